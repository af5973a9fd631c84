//! Format classifier: which converter handles an (input, target) pair.
//!
//! Pure function over the capability table. Rules, first match wins:
//!
//! 1. target is `pdf` → document converter.
//! 2. target is fast-path writable and the input needs no normalisation →
//!    fast path.
//! 3. otherwise → external tool, with pre-processing when the input needs
//!    normalisation and is not already the target format.

use crate::capabilities::CapabilityTable;
use crate::format::Format;
use serde::{Deserialize, Serialize};

/// Outcome of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Classification {
    pub use_fast_path: bool,
    pub use_document_converter: bool,
    pub needs_preprocessing: bool,
}

impl Classification {
    /// True when neither in-process converter was selected.
    pub fn uses_external_tool(&self) -> bool {
        !self.use_fast_path && !self.use_document_converter
    }
}

pub fn classify(table: &CapabilityTable, input: &Format, target: &Format) -> Classification {
    if *target == Format::Pdf {
        return Classification {
            use_document_converter: true,
            ..Default::default()
        };
    }

    let input_needs_normalising = table.requires_preprocessing(input);
    if table.is_fast_writable(target) && !input_needs_normalising {
        return Classification {
            use_fast_path: true,
            ..Default::default()
        };
    }

    Classification {
        needs_preprocessing: input_needs_normalising && input != target,
        ..Default::default()
    }
}
