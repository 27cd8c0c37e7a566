use futures_util::future::BoxFuture;
use huddle::protocol::ClientEvent;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Source of the display name offered on each connect.
///
/// `None` means the user declined; the negotiator then falls back to a
/// generated name.
pub trait IdentityProvider: Send {
    fn request_name(&mut self) -> BoxFuture<'_, Option<String>>;
}

/// Answers every request with the same name, without prompting.
#[derive(Debug, Clone, Default)]
pub struct FixedName(pub Option<String>);

impl FixedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    /// Always decline, so every connect gets a generated name.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for FixedName {
    fn request_name(&mut self) -> BoxFuture<'_, Option<String>> {
        let name = self.0.clone();
        Box::pin(async move { name })
    }
}

/// Picks the display name for each new connection.
pub struct IdentityNegotiator {
    provider: Box<dyn IdentityProvider>,
    rng: Box<dyn RngCore + Send>,
}

impl IdentityNegotiator {
    pub fn new(provider: Box<dyn IdentityProvider>, rng: Box<dyn RngCore + Send>) -> Self {
        Self { provider, rng }
    }

    /// Negotiator with an OS-seeded RNG for fallback names.
    pub fn with_entropy(provider: Box<dyn IdentityProvider>) -> Self {
        Self::new(provider, Box::new(StdRng::from_entropy()))
    }

    /// Ask the provider for a name and settle on one.
    pub async fn negotiate(&mut self) -> String {
        let answer = self.provider.request_name().await;
        self.resolve(answer)
    }

    /// Trimmed answer, or a generated `User<n>` when it is missing, blank or
    /// too large to announce.
    pub fn resolve(&mut self, answer: Option<String>) -> String {
        match answer.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && announceable(name) => name.to_string(),
            Some(name) if !name.is_empty() => {
                tracing::warn!(len = name.len(), "display name too large, using a generated one");
                self.fallback_name()
            }
            _ => self.fallback_name(),
        }
    }

    /// `User0` through `User999`.
    pub fn fallback_name(&mut self) -> String {
        let n: u32 = self.rng.gen_range(0..1000);
        format!("User{n}")
    }
}

fn announceable(name: &str) -> bool {
    ClientEvent::SetUsername(name.to_string())
        .to_frame()
        .encode()
        .is_ok()
}
