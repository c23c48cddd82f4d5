//! The shared symbolic input buffer.
//!
//! Both parsers read the same packet, so there is exactly one buffer per
//! bisimulation run, owned by the engine thread. Bits are fresh 1-bit
//! variables `pkt_<i>`, materialised lazily the first time an offset is
//! read and declared in every portfolio solver at that moment (the engine
//! only materialises between queries, so declarations always land at the
//! base assertion frame).

use octopus_smt::portfolio::{Portfolio, PortfolioError};
use octopus_smt::terms::{TermId, Terms};

#[derive(Default)]
pub struct SymbolicBuffer {
    bits: Vec<TermId>,
}

impl SymbolicBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits materialised so far.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bit_name(index: usize) -> String {
        format!("pkt_{index}")
    }

    /// The term for input bits `[offset, offset + width)`, most significant
    /// first, materialising fresh variables as needed.
    pub fn slice(
        &mut self,
        terms: &Terms,
        solver: &mut Portfolio,
        offset: usize,
        width: u32,
    ) -> Result<TermId, PortfolioError> {
        let end = offset + width as usize;
        while self.bits.len() < end {
            let name = Self::bit_name(self.bits.len());
            let var = terms.var(&name, 1);
            solver.declare_var(&name, 1)?;
            self.bits.push(var);
        }
        Ok(terms.concat_all(&self.bits[offset..end]))
    }

    /// Model-query descriptors for the first `upto` bits.
    pub fn var_names(&self, upto: usize) -> Vec<(String, u32)> {
        (0..upto.min(self.bits.len()))
            .map(|i| (Self::bit_name(i), 1))
            .collect()
    }
}
