//! Notifications published by the coordinators.

pub mod feedback;
pub mod fetch;
pub mod playback;
pub mod schedule;

pub use feedback::*;
pub use fetch::*;
pub use playback::*;
pub use schedule::*;

use std::time::SystemTime;

use uuid::Uuid;

#[derive(Clone, Debug, serde::Serialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub parent_ids: Vec<Uuid>,
    pub timestamp: SystemTime,
}

impl EventHeader {
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            parent_ids: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }
}

impl Default for EventHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements [`Event`](crate::events::Event) for a notification carrying a `header` field.
macro_rules! header_event {
    ($ty:ty, $event_type:literal) => {
        impl $ty {
            pub const EVENT_TYPE: &'static str = $event_type;
        }

        impl $crate::events::Event for $ty {
            fn event_id(&self) -> uuid::Uuid {
                self.header.event_id
            }

            fn parent_ids(&self) -> &[uuid::Uuid] {
                &self.header.parent_ids
            }

            fn event_type(&self) -> &'static str {
                Self::EVENT_TYPE
            }

            fn timestamp(&self) -> std::time::SystemTime {
                self.header.timestamp
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self as &dyn std::any::Any
            }
        }
    };
}

pub(crate) use header_event;
