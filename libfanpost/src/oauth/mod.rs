//! OAuth connection protocol
//!
//! - [`state`]: single-use state tokens and PKCE pairs
//! - [`token`]: authorization-code exchange and refresh against provider endpoints
//! - [`callback`]: the connect flow from authorize URL to stored account
//! - [`mock`]: an in-memory token provider for tests

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub mod callback;
pub mod mock;
pub mod state;
pub mod token;

pub use callback::{
    AuthorizationRequest, CallbackErrorCode, CallbackParams, CallbackRedirect, CompositeState,
    ConnectFlow,
};
pub use state::{IssuedState, StateManager};
pub use token::{HttpTokenClient, TokenProvider, TokenSet};

/// 32 random bytes, base64url without padding (43 characters)
pub fn random_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a PKCE verifier
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
