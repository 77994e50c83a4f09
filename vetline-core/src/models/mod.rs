pub mod message;
pub mod request;
pub mod responder;
pub mod session;

pub use message::{ChatMessage, MessageDraft, Sender};
pub use request::{
    EmergencyRequest, PetProfile, PetProfileInput, RequestStatus, Species, SubmitRequestInput,
};
pub use responder::{Availability, Responder};
pub use session::{CloseReason, SessionSnapshot, SessionState};
