//! # Message Metadata Registry
//!
//! Routing and delivery rules per message type, populated once at startup and
//! read-only afterward.
//!
//! The registry precomputes, for every registered type, the ordered list of
//! types it implies (itself, its parents, their parents...). Publishing a
//! concrete event reaches subscribers of every implied type without any
//! runtime type inspection.

use bus_types::{Address, ConfigurationError, MessageType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// Name of the dispatch strategy used when a type names none.
pub const DEFAULT_DISPATCH_STRATEGY: &str = "default";

/// What a message means to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent to one owner; never published.
    Command,
    /// Published to subscribers; never sent with `send`.
    Event,
    /// No restriction (replies, internal messages).
    Message,
}

/// Rules for one message type.
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    pub message_type: MessageType,
    pub kind: MessageKind,
    /// Endpoint that handles commands of this type or publishes these events.
    pub owner: Option<Address>,
    /// Durable (`true`) or volatile delivery.
    pub recoverable: bool,
    pub time_to_be_received: Option<Duration>,
    /// Name of the dispatch strategy that invokes handlers for this type.
    pub dispatcher: String,
    /// Declared supertypes, used for publish fan-out and handler resolution.
    pub parents: Vec<MessageType>,
}

impl MessageMetadata {
    fn with_kind(message_type: impl Into<MessageType>, kind: MessageKind) -> Self {
        Self {
            message_type: message_type.into(),
            kind,
            owner: None,
            recoverable: true,
            time_to_be_received: None,
            dispatcher: DEFAULT_DISPATCH_STRATEGY.to_string(),
            parents: Vec::new(),
        }
    }

    pub fn command(message_type: impl Into<MessageType>) -> Self {
        Self::with_kind(message_type, MessageKind::Command)
    }

    pub fn event(message_type: impl Into<MessageType>) -> Self {
        Self::with_kind(message_type, MessageKind::Event)
    }

    pub fn message(message_type: impl Into<MessageType>) -> Self {
        Self::with_kind(message_type, MessageKind::Message)
    }

    #[must_use]
    pub fn owned_by(mut self, owner: Address) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.recoverable = false;
        self
    }

    #[must_use]
    pub fn time_to_be_received(mut self, ttbr: Duration) -> Self {
        self.time_to_be_received = Some(ttbr);
        self
    }

    #[must_use]
    pub fn dispatched_by(mut self, strategy: impl Into<String>) -> Self {
        self.dispatcher = strategy.into();
        self
    }

    /// Declare a supertype this message also counts as.
    #[must_use]
    pub fn implies(mut self, parent: impl Into<MessageType>) -> Self {
        self.parents.push(parent.into());
        self
    }
}

/// Read-only lookup from message type to [`MessageMetadata`].
#[derive(Debug, Clone)]
pub struct MessageMetadataRegistry {
    entries: HashMap<MessageType, MessageMetadata>,
    implied: HashMap<MessageType, Vec<MessageType>>,
}

impl MessageMetadataRegistry {
    /// Build the registry and its implies-closure.
    ///
    /// A later entry for the same type replaces the earlier one.
    pub fn new(
        metadata: impl IntoIterator<Item = MessageMetadata>,
    ) -> Result<Self, ConfigurationError> {
        let entries: HashMap<MessageType, MessageMetadata> = metadata
            .into_iter()
            .map(|m| (m.message_type.clone(), m))
            .collect();

        if entries.is_empty() {
            return Err(ConfigurationError::EmptyMessageRegistry);
        }

        let implied = entries
            .keys()
            .map(|t| (t.clone(), Self::closure(&entries, t)))
            .collect();

        Ok(Self { entries, implied })
    }

    // Breadth-first so nearer ancestors come first; cycles terminate on `seen`.
    fn closure(
        entries: &HashMap<MessageType, MessageMetadata>,
        root: &MessageType,
    ) -> Vec<MessageType> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(entry) = entries.get(&current) {
                queue.extend(entry.parents.iter().cloned());
            }
            order.push(current);
        }
        order
    }

    pub fn get(&self, message_type: &MessageType) -> Option<&MessageMetadata> {
        self.entries.get(message_type)
    }

    /// Like [`get`](Self::get) but unknown types are an error.
    pub fn require(&self, message_type: &MessageType) -> Result<&MessageMetadata, ConfigurationError> {
        self.get(message_type)
            .ok_or_else(|| ConfigurationError::UnknownMessageType(message_type.clone()))
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.entries.contains_key(message_type)
    }

    /// The type itself followed by every transitive supertype, each once.
    /// Unregistered types imply only themselves.
    pub fn implied_types(&self, message_type: &MessageType) -> Vec<MessageType> {
        self.implied
            .get(message_type)
            .cloned()
            .unwrap_or_else(|| vec![message_type.clone()])
    }

    pub fn owner(&self, message_type: &MessageType) -> Option<&Address> {
        self.get(message_type).and_then(|m| m.owner.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageMetadata> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
