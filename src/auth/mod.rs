//! Session side of the broker: tokens, devices, throttling, revocation.

pub mod brute_force;
pub mod cookies;
pub mod crypto;
pub mod device;
pub mod error;
pub mod revocation;
pub mod session;
pub mod token;
pub mod users;

pub use brute_force::BruteForceGuard;
pub use cookies::{CookieOptions, CookieStore, RequestCookies, SameSite};
pub use crypto::CredentialCipher;
pub use device::DeviceInfo;
pub use error::AuthError;
pub use revocation::{MemoryRevocationStore, PgRevocationStore, RevocationStore};
pub use session::{LoginOutcome, Session, SessionBroker, SessionPolicy, ACCESS_COOKIE, REFRESH_COOKIE};
pub use token::{Claims, TokenCodec, TokenEnvelope, TokenForm};
pub use users::{AuthUser, PgUserRepository, UserRepository};
