//! Compute-unit metering: a pure function over a constants panel, in the
//! same stateless-calculator style as a block-reward or fee-total helper.

/// Selects the base compute-unit rate a resource consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Contract,
    AiModel,
}

impl ResourceType {
    #[must_use]
    pub fn base_cu(self) -> f64 {
        match self {
            Self::Contract => 1.0,
            Self::AiModel => 2.0,
        }
    }
}

/// Per-dimension weighting factors. `Default` carries the constants every
/// node uses unless explicitly overridden.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CuParams {
    pub input_factor: f64,
    pub time_factor: f64,
    pub storage_factor: f64,
    pub cross_factor: f64,
    pub complexity_factor: f64,
}

impl Default for CuParams {
    fn default() -> Self {
        Self {
            input_factor: 0.001,
            time_factor: 0.01,
            storage_factor: 0.5,
            cross_factor: 2.0,
            complexity_factor: 1.0,
        }
    }
}

/// `cu = complexity_factor * base_cu * (1 + input_factor*input_bytes +
/// time_factor*exec_ms + storage_factor*storage_ops + cross_factor*cross_calls)`,
/// rounded half-away-from-zero to two decimals and clamped non-negative.
#[must_use]
pub fn compute_units(
    resource_type: ResourceType,
    params: CuParams,
    input_bytes: u64,
    exec_ms: u64,
    storage_ops: u64,
    cross_calls: u64,
) -> f64 {
    let raw = params.complexity_factor
        * resource_type.base_cu()
        * (1.0
            + params.input_factor * input_bytes as f64
            + params.time_factor * exec_ms as f64
            + params.storage_factor * storage_ops as f64
            + params.cross_factor * cross_calls as f64);
    round_half_away_from_zero(raw.max(0.0))
}

fn round_half_away_from_zero(value: f64) -> f64 {
    let scaled = value * 100.0;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    rounded / 100.0
}
