mod clock;
mod counter_store;
mod ocr_upstream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter_store::CounterStore;
pub use ocr_upstream::OcrUpstream;
