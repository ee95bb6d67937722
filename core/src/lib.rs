//! Networking and storage core for the kitchen app.
//!
//! # Overview
//! Two layers sit on top of each other:
//! - `KitchenClient` turns an `Endpoint` into an `HttpRequest` and an
//!   `HttpResponse` back into a typed value, without touching the network.
//! - `KitchenApi` executes those descriptors over a `Transport`, keeps the
//!   auth `Session` and exposes each operation as an `async fn`, a
//!   completion-callback variant and a one-shot cancellable stream.
//!
//! `Store` is an independent SQLite store with versioned migrations and a
//! read/write gate; `RecipeRepository` is the domain repository on top of it.
//!
//! # Design
//! - Responses arrive wrapped in `{success, message, code, data}`; the
//!   `envelope` module owns that decoding.
//! - Every failure surfaces as `ApiError`, which carries a stable numeric
//!   code for hosts on the far side of the FFI.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod http;
pub mod media;
pub mod migration;
pub mod recipes;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

pub use api::{KitchenApi, ResponseStream};
pub use client::KitchenClient;
pub use config::ClientConfig;
pub use endpoint::{Endpoint, Fields, FileUpload};
pub use envelope::Envelope;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, MultipartForm, RequestBody};
pub use migration::{Migration, Migrator};
pub use recipes::{NewRecipe, Recipe, RecipeRepository};
pub use session::{JsonFileStore, KeyValueStore, MemoryStore, Session, SessionEvent};
pub use store::{Store, StoreError};
pub use transport::{ActivityObserver, Connector, Transport, TransportObserver, UreqConnector};
pub use types::{AuthResponse, Credentials, DataItem, Paginated, Registration, UploadResult, User};
