use crate::error::CodeCrowError;
use cc_events::types::EventRecord;

pub trait EventRepository {
    fn append(&self, event: EventRecord) -> Result<EventRecord, CodeCrowError>;
    fn list(&self, after: Option<i64>, limit: Option<u32>)
    -> Result<Vec<EventRecord>, CodeCrowError>;
}
