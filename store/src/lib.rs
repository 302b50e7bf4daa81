//! # Lattice Store
//!
//! A reactive normalized record cache for graph data clients.
//!
//! This crate provides the in-memory core of a graph-data client: it stores
//! entity records keyed by stable identity, reads tree-shaped snapshots
//! through selection ASTs, applies server payloads and optimistic local
//! updates transactionally, notifies exactly the subscribers whose records
//! changed, and reclaims records no live selector can reach.
//!
//! ## Design Principles
//!
//! - **No IO**: the core has no knowledge of transports or schedulers; the
//!   network is a trait boundary
//! - **Single-threaded**: one cooperative execution context owns the store;
//!   overlays and tokens replace locks
//! - **Transactional**: incoming data stages in overlays; a failed publish
//!   leaves the base source untouched
//! - **Deterministic**: storage keys, client ids, and serialized sources
//!   are canonical, so equal inputs produce byte-equal state
//!
//! ## Core Concepts
//!
//! ### Records and sources
//!
//! A [`Record`] is a flat map from storage key to [`FieldValue`] (scalar,
//! link, link list, or the known-missing sentinel). A [`RecordSource`] maps
//! [`DataId`]s to records and distinguishes three states per identity:
//! existent, nonexistent (explicitly null on the server), and unknown
//! (never fetched). Records reference each other by id only, so cycles are
//! representable without cyclic ownership.
//!
//! ### Selectors, normalization, and reads
//!
//! A [`Selector`] pairs a root id with a selection AST and variable
//! bindings. [`normalize`] flattens a response tree into records;
//! [`read`] rebuilds a tree-shaped [`Snapshot`] from the source, tracking
//! every record the result depends on.
//!
//! ### Publishing and notification
//!
//! A [`PublishQueue`] stages server payloads, committed updaters, and
//! revertible optimistic updates. [`PublishQueue::run`] merges staged work
//! into the [`Store`]'s base and rebuilds the optimistic overlay;
//! [`Store::notify`] then re-reads exactly the affected subscriptions and
//! dispatches the ones whose data actually changed.
//!
//! ### Retention
//!
//! [`Store::retain`] pins everything reachable from a selector. Releasing
//! the pin schedules a mark-sweep collection that runs at the end of the
//! next notify tick. Ids created locally (never fetched from a server) use
//! the [`CLIENT_ID_PREFIX`]; the root record lives at [`ROOT_ID`].
//!
//! ## Quick Start
//!
//! ```rust
//! use lattice_store::{
//!     Argument, FragmentCatalog, LinkedField, OperationDescriptor, PublishQueue, ScalarField,
//!     Selection, Store, Variables,
//! };
//! use serde_json::json;
//!
//! // 1. Describe the operation shape
//! let operation = OperationDescriptor::new(
//!     "UserQuery",
//!     vec![Selection::Linked(
//!         LinkedField::new(
//!             "user",
//!             vec![
//!                 Selection::Scalar(ScalarField::new("id")),
//!                 Selection::Scalar(ScalarField::new("name")),
//!             ],
//!         )
//!         .with_args(vec![Argument::literal("id", json!("4"))]),
//!     )],
//!     Variables::new(),
//! );
//!
//! // 2. Create a store and a publish queue
//! let mut store = Store::new(FragmentCatalog::new());
//! let mut queue = PublishQueue::new();
//!
//! // 3. Publish a server response
//! queue
//!     .commit_payload(
//!         store.fragments(),
//!         &operation,
//!         &json!({"user": {"id": "4", "name": "Zuck", "__typename": "User"}}),
//!     )
//!     .unwrap();
//! queue.run(&mut store).unwrap();
//! store.notify().unwrap();
//!
//! // 4. Read it back
//! let snapshot = store.lookup(&operation.root).unwrap();
//! assert_eq!(snapshot.data.unwrap()["user"]["name"], "Zuck");
//! ```
//!
//! ## Mutations
//!
//! An [`Environment`] wires one store, one queue, and one [`Network`]
//! together. [`Environment::execute_mutation`] applies an optimistic update
//! before the round trip, commits each server payload as it arrives, and
//! reverts the optimistic update on error or completion.

pub mod ast;
pub mod check;
pub mod environment;
pub mod error;
pub mod handles;
pub mod key;
pub mod normalize;
pub mod observable;
pub mod proxy;
pub mod publish;
pub mod read;
pub mod record;
pub mod source;
pub mod store;

// Re-export main types at crate root
pub use ast::{
    Argument, ArgumentValue, Condition, ConditionValue, Fragment, FragmentCatalog, FragmentSpread,
    HandleField, InlineFragment, LinkedField, OperationDescriptor, ScalarField, Selection,
    Selector,
};
pub use check::{check, MissingFieldHandler};
pub use environment::{Environment, GraphQLResponse, MutationConfig, Network};
pub use error::{Error, Result};
pub use handles::{Handler, HandlerRegistry};
pub use key::{canonical_json, handle_storage_key, storage_key, storage_key_literal};
pub use normalize::{normalize, HandleFieldPayload};
pub use observable::{Event, Observable, Observer};
pub use proxy::{RecordProxy, RecordSourceProxy, SelectorProxy};
pub use publish::{
    OptimisticUpdate, PayloadError, PublishQueue, ResponsePayload, StoreUpdater, UpdateToken,
};
pub use read::{read, Snapshot};
pub use record::{FieldValue, Record};
pub use source::{OverlaySource, RecordSource, RecordSourceRead, RecordState, SOURCE_FORMAT_VERSION};
pub use store::{RetainToken, Store, SubscriptionToken};

/// Type aliases for clarity
pub type DataId = String;
pub type TypeName = String;
pub type StorageKey = String;
pub type Variables = std::collections::HashMap<String, serde_json::Value>;

/// Identity of the client root record.
pub const ROOT_ID: &str = "client:root";

/// Prefix of identities synthesized on the client for records the server
/// never assigned a global id.
pub const CLIENT_ID_PREFIX: &str = "client:";
