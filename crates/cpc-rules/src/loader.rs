//! Reference table loader
//!
//! Builds a [`RuleCascade`] from the three configured table files.
//! Any missing or malformed table aborts before classification starts.

use tracing::info;

use cpc_core::{Result, TablesConfig};
use cpc_io::load_reference_table;

use crate::cascade::RuleCascade;

/// Load the heritage, culture and instance tables and assemble the cascade
pub fn load_rule_cascade(tables: &TablesConfig) -> Result<RuleCascade> {
    let heritage = load_reference_table(&tables.heritage)?;
    let culture = load_reference_table(&tables.culture)?;
    let instance = load_reference_table(&tables.instance)?;

    info!(
        heritage = heritage.len(),
        culture = culture.len(),
        instance = instance.len(),
        "Reference tables loaded"
    );

    Ok(RuleCascade::new(heritage, culture, instance))
}
