/// Name used for data directories and the store root.
pub const APP_NAME: &str = "kiln";

/// Length of the truncated SHA-256 used for layer and image ids.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Marker file written last into a completed store entry.
pub const COMPLETE_MARKER: &str = ".kiln-complete";

/// Tag applied when a reference names no tag.
pub const DEFAULT_TAG: &str = "latest";

/// Descriptor file looked up in the build context by default.
pub const DESCRIPTOR_FILENAME: &str = "kiln.lua";

/// Environment variable overriding the store location.
pub const STORE_ENV: &str = "KILN_STORE";

/// `SOURCE_DATE_EPOCH` given to installers (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
