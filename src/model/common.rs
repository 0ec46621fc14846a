use rand::RngCore;
use uuid::Uuid;

pub type Id = Uuid;

pub fn generate_id() -> Id {
    Uuid::new_v4()
}

/// Parse a client-supplied id. Anything that is not a UUID cannot name a row.
pub fn parse_id(raw: &str) -> Option<Id> {
    Uuid::parse_str(raw.trim()).ok()
}

/// Generate an opaque bearer token: 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
