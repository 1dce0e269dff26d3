pub mod alert_state;
pub mod annotate;
pub mod bounding_box;
pub mod classifier;
pub mod foreground;
pub mod frame;
pub mod region_consolidator;
pub mod source;
#[cfg(feature = "backend-tract")]
pub mod tract_classifier;
