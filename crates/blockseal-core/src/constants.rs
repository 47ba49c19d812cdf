pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Leading hex zeros required of a block hash unless configured otherwise.
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Integrity scans also hold the genesis block to its proof of work and shape.
pub const DEFAULT_VERIFY_GENESIS: bool = true;

/// How many nonces a search tries between cancellation checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 1 << 12;

/// Tag byte preceding the authentication fields of a transaction in the canonical encoding.
pub const AUTH_TAG_UNSIGNED: u8 = 0;
pub const AUTH_TAG_SIGNED: u8 = 1;
