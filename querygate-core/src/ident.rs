//! Monotonic alias and parameter naming, shared by a single query structure.
//!
//! A `Counter` is owned by exactly one top-level `QueryStructure` (see [`crate::structure`]) and is the
//! mechanism the "Alias uniqueness" invariant relies on: every alias and every parameter name minted for
//! a structure, including those contributed by nested joins and the policy processor, comes from the
//! same counter, so no two can collide.

use smol_str::SmolStr;

/// Produces unique table aliases (`table1`, `table2`, …) and parameter names (`@param1`, …) for one
/// query structure. Not `Clone` and not thread-safe on purpose — a structure is single-owner for its
/// lifetime (§4.1).
#[derive(Debug, Default)]
pub struct Counter {
    next_alias: u64,
    next_param: u64,
    next_session_param: u64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_alias(&mut self) -> SmolStr {
        let n = self.next_alias;
        self.next_alias += 1;
        SmolStr::new(format!("table{n}"))
    }

    /// Returns a fresh `@paramN` name. Never deduplicates, even for identical values (§4.1 contract).
    pub fn next_param(&mut self) -> SmolStr {
        let n = self.next_param;
        self.next_param += 1;
        SmolStr::new(format!("@param{n}"))
    }

    /// Returns a fresh `@session_paramN` name, used only by the T-SQL session-context prelude (§4.4).
    pub fn next_session_param(&mut self) -> SmolStr {
        let n = self.next_session_param;
        self.next_session_param += 1;
        SmolStr::new(format!("@session_param{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_and_params_are_distinct_sequences() {
        let mut c = Counter::new();
        assert_eq!(c.next_alias(), "table0");
        assert_eq!(c.next_alias(), "table1");
        assert_eq!(c.next_param(), "@param0");
        assert_eq!(c.next_param(), "@param1");
        assert_eq!(c.next_alias(), "table2");
    }

    #[test]
    fn no_deduplication_across_calls() {
        let mut c = Counter::new();
        let a = c.next_param();
        let b = c.next_param();
        assert_ne!(a, b);
    }
}
