pub mod pipeline_event;
