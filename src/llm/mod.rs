pub mod client;
pub mod intent;
pub mod knowledge;
pub mod prompts;
pub mod retry;
pub mod router;
pub mod secondary;
pub mod visual;

pub use client::{GeminiClient, GenerativeBackend};
pub use prompts::Persona;
pub use retry::RetryPolicy;
pub use router::{Attachment, ProviderRequest, ProviderResult, ProviderRouter};
pub use secondary::SecondaryAdapter;
