pub mod assistant;
pub mod config;
pub mod directory;
pub mod error;
pub mod geo;
pub mod ipc;
pub mod models;
pub mod ranker;

pub use assistant::{
    create_backend, AdvisoryPolicy, Assistant, AssistantBackend, AssistantError,
    HttpAssistantClient, ScriptedAssistant, FALLBACK_REPLY, GREETING, POLICY_SAFE_REPLY,
};
pub use config::VetlineConfig;
pub use directory::{NearbyResponder, ResponderDirectory};
pub use error::VetlineError;
pub use geo::{haversine_km, GeoPoint};
pub use ranker::{rank, RankWeights, RankedCandidate};
