/// Application name
pub const APP_NAME: &str = "Kongossa";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count for tunnel keys.
/// Changing this changes every tunnel key, so it is fixed.
pub const KDF_ITERATIONS: u32 = 100_000;

/// PBKDF2 salt for tunnel keys
pub const KDF_SALT_TUNNEL_KEY: &[u8] = b"kongossa-tunnel-key-v1";

/// Length of a tunnel id in hex characters (80 bits of SHA-256).
///
/// Short enough to read out loud or paste in a chat, long enough that two
/// distinct secrets practically never meet (birthday bound around 2^40
/// tunnels). Changing it splits every existing tunnel.
pub const TUNNEL_ID_HEX_LEN: usize = 20;

/// Minimum accepted secret length in characters
pub const MIN_SECRET_LEN: usize = 6;

/// Default retention limit per tunnel
pub const DEFAULT_TUNNEL_CAPACITY: usize = 200;

/// Presence window in seconds
pub const PRESENCE_TTL_SECS: u64 = 30;

/// Minimum interval between two activity clock steps
pub const ACTIVITY_STEP_SECS: u64 = 3;

/// Per-peer fetch timeout in seconds
pub const PEER_TIMEOUT_SECS: u64 = 3;

/// Query value that selects the exposed state snapshot (`?api=state`)
pub const STATE_API: &str = "state";

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum plaintext accepted by a tunnel session (256 KiB)
pub const MAX_PLAINTEXT_SIZE: usize = 262_144;

/// Largest peer state response accepted (8 MiB)
pub const MAX_PEER_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Most tunnels accepted from a single peer response
pub const MAX_TUNNELS_PER_PEER: usize = 256;
