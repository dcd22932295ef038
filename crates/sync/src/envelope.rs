//! Change notification envelopes
//!
//! An [`Envelope`] is the typed form of one domain change: which entity kind,
//! which action, and the payload. On the broker it travels as a routing key
//! (`fishingTrip.created`) plus a JSON body holding the payload alone; on the
//! viewer socket it travels as `{"type": <topic>, "data": <payload>}`.
//!
//! Decoding is closed over the known kinds and actions, so everything past
//! the broker boundary works with typed entities instead of raw JSON.

use fishlog_core::models::{Entity, EntityKind, FishingTrip, Project, TripEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame type used for the resynchronisation control message
pub const RESYNC_FRAME_TYPE: &str = "sync.resync";

/// Envelope encoding and decoding errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid payload for {topic}: {source}")]
    InvalidPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Created, Action::Updated, Action::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
        }
    }
}

impl FromStr for Action {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownAction(s.to_string()))
    }
}

/// `<entityKind>.<action>`, used as the broker routing key and the frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: EntityKind,
    pub action: Action,
}

impl Topic {
    pub fn new(kind: EntityKind, action: Action) -> Self {
        Self { kind, action }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.as_str(), self.action.as_str())
    }
}

impl FromStr for Topic {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, action) = s
            .split_once('.')
            .ok_or_else(|| EnvelopeError::MalformedTopic(s.to_string()))?;

        let kind = kind
            .parse::<EntityKind>()
            .map_err(|_| EnvelopeError::UnknownKind(kind.to_string()))?;

        Ok(Topic::new(kind, action.parse()?))
    }
}

/// Payload of a `deleted` notification: the id and nothing else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One change to an entity of type `E`
#[derive(Debug, Clone, PartialEq)]
pub enum Change<E> {
    Created(E),
    Updated(E),
    Deleted(EntityRef),
}

impl<E: Entity> Change<E> {
    pub fn action(&self) -> Action {
        match self {
            Change::Created(_) => Action::Created,
            Change::Updated(_) => Action::Updated,
            Change::Deleted(_) => Action::Deleted,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Change::Created(entity) | Change::Updated(entity) => entity.id(),
            Change::Deleted(entity_ref) => &entity_ref.id,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Change::Created(entity) | Change::Updated(entity) => serde_json::to_value(entity),
            Change::Deleted(entity_ref) => serde_json::to_value(entity_ref),
        }
    }

    fn from_payload(action: Action, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match action {
            Action::Created => Change::Created(serde_json::from_value(payload)?),
            Action::Updated => Change::Updated(serde_json::from_value(payload)?),
            Action::Deleted => Change::Deleted(serde_json::from_value(payload)?),
        })
    }
}

/// A typed change notification for any entity kind
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    FishingTrip(Change<FishingTrip>),
    TripEvent(Change<TripEvent>),
    Project(Change<Project>),
}

impl Envelope {
    pub fn kind(&self) -> EntityKind {
        match self {
            Envelope::FishingTrip(_) => EntityKind::FishingTrip,
            Envelope::TripEvent(_) => EntityKind::TripEvent,
            Envelope::Project(_) => EntityKind::Project,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Envelope::FishingTrip(change) => change.action(),
            Envelope::TripEvent(change) => change.action(),
            Envelope::Project(change) => change.action(),
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::new(self.kind(), self.action())
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Envelope::FishingTrip(change) => change.id(),
            Envelope::TripEvent(change) => change.id(),
            Envelope::Project(change) => change.id(),
        }
    }

    /// Payload as JSON: the full entity, or `{id}` for deletions
    pub fn payload(&self) -> Result<Value, EnvelopeError> {
        let payload = match self {
            Envelope::FishingTrip(change) => change.payload(),
            Envelope::TripEvent(change) => change.payload(),
            Envelope::Project(change) => change.payload(),
        };
        Ok(payload?)
    }

    /// Broker message body
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(&self.payload()?)?)
    }

    /// Build an envelope from a topic and an already parsed payload
    pub fn from_value(topic: Topic, payload: Value) -> Result<Self, EnvelopeError> {
        let invalid = |source: serde_json::Error| EnvelopeError::InvalidPayload {
            topic: topic.to_string(),
            source,
        };

        Ok(match topic.kind {
            EntityKind::FishingTrip => {
                Envelope::FishingTrip(Change::from_payload(topic.action, payload).map_err(invalid)?)
            }
            EntityKind::TripEvent => {
                Envelope::TripEvent(Change::from_payload(topic.action, payload).map_err(invalid)?)
            }
            EntityKind::Project => {
                Envelope::Project(Change::from_payload(topic.action, payload).map_err(invalid)?)
            }
        })
    }

    /// Decode a broker delivery from its routing key and body
    pub fn decode(routing_key: &str, body: &[u8]) -> Result<Self, EnvelopeError> {
        let topic: Topic = routing_key.parse()?;
        let payload: Value =
            serde_json::from_slice(body).map_err(|source| EnvelopeError::InvalidPayload {
                topic: topic.to_string(),
                source,
            })?;
        Self::from_value(topic, payload)
    }

    /// Viewer socket frame: `{"type": <topic>, "data": <payload>}`
    pub fn to_frame(&self) -> Result<String, EnvelopeError> {
        let frame = RawFrame {
            frame_type: self.topic().to_string(),
            data: self.payload()?,
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Entities that can be wrapped into an [`Envelope`]
pub trait Publishable: Entity {
    fn into_envelope(change: Change<Self>) -> Envelope;
}

impl Publishable for FishingTrip {
    fn into_envelope(change: Change<Self>) -> Envelope {
        Envelope::FishingTrip(change)
    }
}

impl Publishable for TripEvent {
    fn into_envelope(change: Change<Self>) -> Envelope {
        Envelope::TripEvent(change)
    }
}

impl Publishable for Project {
    fn into_envelope(change: Change<Self>) -> Envelope {
        Envelope::Project(change)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ResyncData {
    #[serde(default)]
    reason: String,
}

/// Anything a viewer can receive over its socket
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerFrame {
    Change(Envelope),
    /// The server may have missed changes; re-pull a snapshot
    Resync { reason: String },
}

impl ViewerFrame {
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(EnvelopeError::InvalidFrame)?;

        if raw.frame_type == RESYNC_FRAME_TYPE {
            let data: ResyncData =
                serde_json::from_value(raw.data).map_err(EnvelopeError::InvalidFrame)?;
            return Ok(ViewerFrame::Resync {
                reason: data.reason,
            });
        }

        let topic: Topic = raw.frame_type.parse()?;
        Ok(ViewerFrame::Change(Envelope::from_value(topic, raw.data)?))
    }

    /// Serialized resync control frame
    pub fn resync_frame(reason: &str) -> Result<String, EnvelopeError> {
        let frame = RawFrame {
            frame_type: RESYNC_FRAME_TYPE.to_string(),
            data: serde_json::json!({ "reason": reason }),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use fishlog_core::models::NewFishingTrip;

    fn trip() -> FishingTrip {
        FishingTrip::from_draft(
            "t1".to_string(),
            NewFishingTrip {
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                location_name: "Clear Creek".to_string(),
                latitude: 45.5,
                longitude: -122.6,
                water_conditions: None,
                weather: None,
                notes: None,
                catch_count: None,
            },
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn test_topic_parse_and_display() {
        let topic: Topic = "fishingTrip.created".parse().unwrap();
        assert_eq!(topic, Topic::new(EntityKind::FishingTrip, Action::Created));
        assert_eq!(topic.to_string(), "fishingTrip.created");

        assert!(matches!(
            "fishingTrip".parse::<Topic>(),
            Err(EnvelopeError::MalformedTopic(_))
        ));
        assert!(matches!(
            "boat.created".parse::<Topic>(),
            Err(EnvelopeError::UnknownKind(_))
        ));
        assert!(matches!(
            "project.archived".parse::<Topic>(),
            Err(EnvelopeError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_deleted_payload_carries_only_id() {
        let envelope = Envelope::FishingTrip(Change::Deleted(EntityRef::new("t1")));

        assert_eq!(envelope.payload().unwrap(), serde_json::json!({ "id": "t1" }));
        assert_eq!(envelope.topic().to_string(), "fishingTrip.deleted");
        assert_eq!(envelope.entity_id(), "t1");
    }

    #[test]
    fn test_decode_broker_delivery() {
        let body = serde_json::to_vec(&trip()).unwrap();
        let envelope = Envelope::decode("fishingTrip.updated", &body).unwrap();

        assert_eq!(envelope, Envelope::FishingTrip(Change::Updated(trip())));
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let body = serde_json::to_vec(&trip()).unwrap();

        // a trip is not a valid trip event
        match Envelope::decode("tripEvent.created", &body) {
            Err(EnvelopeError::InvalidPayload { topic, .. }) => {
                assert_eq!(topic, "tripEvent.created")
            }
            other => panic!("expected invalid payload, got {other:?}"),
        }

        assert!(Envelope::decode("fishingTrip.created", b"not json").is_err());
    }

    #[test]
    fn test_frame_shape() {
        let envelope = Envelope::FishingTrip(Change::Created(trip()));
        let frame: Value = serde_json::from_str(&envelope.to_frame().unwrap()).unwrap();

        assert_eq!(frame["type"], "fishingTrip.created");
        assert_eq!(frame["data"]["id"], "t1");
        assert_eq!(frame["data"]["locationName"], "Clear Creek");
    }

    #[test]
    fn test_viewer_frame_parse() {
        let envelope = Envelope::FishingTrip(Change::Created(trip()));
        let parsed = ViewerFrame::parse(&envelope.to_frame().unwrap()).unwrap();
        assert_eq!(parsed, ViewerFrame::Change(envelope));

        let resync = ViewerFrame::resync_frame("broker reconnected").unwrap();
        assert_eq!(
            ViewerFrame::parse(&resync).unwrap(),
            ViewerFrame::Resync {
                reason: "broker reconnected".to_string()
            }
        );

        assert!(matches!(
            ViewerFrame::parse("{}"),
            Err(EnvelopeError::InvalidFrame(_))
        ));
    }
}
