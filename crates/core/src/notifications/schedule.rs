use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::notifications::{EventHeader, header_event};

#[derive(Clone, Debug, Serialize)]
pub struct ScheduleFired {
    pub header: EventHeader,
    pub schedule_id: String,
    pub name: String,
    pub topics: Vec<String>,
    pub fired_at: DateTime<Utc>,
}

header_event!(ScheduleFired, "schedule.fired");

impl ScheduleFired {
    pub fn new(
        schedule_id: String,
        name: String,
        topics: Vec<String>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            header: EventHeader::new(),
            schedule_id,
            name,
            topics,
            fired_at,
        }
    }
}
