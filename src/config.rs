/// Default ceiling on the assignment-set size below which lines are
/// unrolled rather than looped.
pub const DEFAULT_UNROLL_POLICY: usize = 1000;

/// Default maximum recursive self-expansion depth.
pub const DEFAULT_MAX_RECURSION: usize = 8;

/// Immutable engine configuration, injected at agent construction.
///
/// Nothing in the engine reads process-global state; everything a
/// translation pass needs to know arrives through this value.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of fields in the model; lowercase index labels range
    /// over `0..num_fields`.
    pub num_fields: u32,
    /// Number of parameters; parameter-class rule indices range over
    /// `0..num_params`.
    pub num_params: u32,
    /// Unrolling threshold: lines whose combined assignment-set size
    /// stays at or below this are unrolled by policy.
    pub unroll_policy: usize,
    /// Fast mode forces unrolling wherever it is not prevented.
    pub fast: bool,
    /// Maximum recursive self-expansion depth before a line is
    /// abandoned with a warning.
    pub max_recursion: usize,
    /// Whether the model distinguishes covariant and contravariant
    /// index positions.
    pub nontrivial_metric: bool,
    /// Operator splitting a plain assignment line, searched first.
    pub assign_op: String,
    /// Operator splitting an accumulation line.
    pub accumulate_op: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_fields: 0,
            num_params: 0,
            unroll_policy: DEFAULT_UNROLL_POLICY,
            fast: false,
            max_recursion: DEFAULT_MAX_RECURSION,
            nontrivial_metric: false,
            assign_op: " = ".to_string(),
            accumulate_op: " += ".to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration for a model with `num_fields` fields and
    /// `num_params` parameters, everything else defaulted.
    pub fn for_model(num_fields: u32, num_params: u32) -> Self {
        EngineConfig {
            num_fields,
            num_params,
            ..EngineConfig::default()
        }
    }
}
