/// Branch lengths below this are floored on input so that transition matrices
/// stay well-conditioned.
pub const MIN_BRANCH_LENGTH: f64 = 1e-6;

/// Characters that may not appear in sequence names (they collide with the
/// Newick grammar and with our output formats).
pub const FORBIDDEN_NAME_CHARS: &str = "();:\"'[]&,";

/// Mantissa band for scaled-exponent probabilities: when a mantissa leaves
/// `[2^-EXP_CHUNK, 2^EXP_CHUNK]` it is rescaled by a whole chunk.
pub const EFLOAT_EXP_CHUNK: i64 = 256;

/// Default end probability of the pairwise alignment HMM.
pub const HMM_TAU: f64 = 1e-4;
