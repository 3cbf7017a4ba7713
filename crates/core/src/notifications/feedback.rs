use serde::Serialize;

use crate::{
    notifications::{EventHeader, header_event},
    types::{Reaction, TopicKey},
};

#[derive(Clone, Debug, Serialize)]
pub struct FeedbackSubmitted {
    pub header: EventHeader,
    pub key: TopicKey,
    pub reaction: Reaction,
    pub articles: usize,
}

header_event!(FeedbackSubmitted, "feedback.submitted");

impl FeedbackSubmitted {
    pub fn new(key: TopicKey, reaction: Reaction, articles: usize) -> Self {
        Self {
            header: EventHeader::new(),
            key,
            reaction,
            articles,
        }
    }
}
