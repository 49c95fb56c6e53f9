//! Address decoder: a pure, stateless mapping from a 64-bit physical
//! address to (rank, bank, row, col) under one of five selectable
//! interleaving policies.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressPolicy {
    OpenPage,
    ClosePage,
    RowBankColumnBankGroupInterleave,
    RowColumnBank,
    BankRowColumn,
}

impl AddressPolicy {
    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "open_page" => AddressPolicy::OpenPage,
            "close_page" => AddressPolicy::ClosePage,
            "row_bank_column_bank_group_interleave" => {
                AddressPolicy::RowBankColumnBankGroupInterleave
            }
            "row_column_bank" => AddressPolicy::RowColumnBank,
            "bank_row_column" => AddressPolicy::BankRowColumn,
            _ => return None,
        })
    }
}

/// Decoded address fields. A single rank is assumed everywhere in this
/// crate (see spec Non-goals); `rank` is carried so the field exists for a
/// future multi-rank extension but is always 0 today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAddress {
    pub rank: u32,
    pub bank: u32,
    pub row: u32,
    pub col: u32,
}

/// Number of bits needed to represent `count` distinct values, rounding
/// `count` up to the next power of two first (masks are
/// `next_power_of_two(count) - 1`).
fn bits_for(count: u32) -> u32 {
    if count <= 1 {
        0
    } else {
        count.next_power_of_two().trailing_zeros()
    }
}

fn take_bits(addr: &mut u64, width: u32) -> u64 {
    if width == 0 {
        return 0;
    }
    let mask = (1u64 << width) - 1;
    let v = *addr & mask;
    *addr >>= width;
    v
}

#[derive(Debug, Clone)]
pub struct AddressDecoder {
    policy: AddressPolicy,
    unused_lsbs: u32,
    num_banks: u32,
    num_banks_per_group: u32,
    num_memory_controllers: u32,
    bank_bits: u32,
    row_bits: u32,
    col_bits: u32,
    group_bits: u32,
    bank_in_group_bits: u32,
}

impl AddressDecoder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: AddressPolicy,
        num_banks: u32,
        num_banks_per_group: u32,
        num_rows_per_bank: u32,
        num_columns_per_bank: u32,
        num_memory_controllers: u32,
        unused_lsbs: u32,
    ) -> Result<Self, ConfigError> {
        if num_banks == 0 || num_rows_per_bank == 0 || num_columns_per_bank == 0 {
            return Err(ConfigError::InvalidGeometry(
                "num_banks, num_rows, and num_columns must be non-zero".to_string(),
            ));
        }
        if num_memory_controllers == 0 {
            return Err(ConfigError::InvalidGeometry(
                "num_memory_controllers must be non-zero".to_string(),
            ));
        }
        let num_banks_per_group = num_banks_per_group.max(1);
        if matches!(policy, AddressPolicy::RowBankColumnBankGroupInterleave)
            && num_banks % num_banks_per_group != 0
        {
            return Err(ConfigError::InvalidGeometry(format!(
                "num_banks_per_group ({num_banks_per_group}) must divide num_banks ({num_banks})"
            )));
        }

        let num_groups = (num_banks / num_banks_per_group).max(1);
        let group_bits = bits_for(num_groups);
        let bank_in_group_bits = bits_for(num_banks_per_group);
        let bank_bits = bits_for(num_banks);
        let row_bits = bits_for(num_rows_per_bank);
        let col_bits = bits_for(num_columns_per_bank);

        Ok(Self {
            policy,
            unused_lsbs,
            num_banks,
            num_banks_per_group,
            num_memory_controllers,
            bank_bits,
            row_bits,
            col_bits,
            group_bits,
            bank_in_group_bits,
        })
    }

    pub fn num_memory_controllers(&self) -> u32 {
        self.num_memory_controllers
    }

    /// Decodes a 64-bit physical address into (rank, bank, row, col).
    /// Called exactly once per arriving request.
    pub fn decode(&self, address: u64) -> DecodedAddress {
        let mut a = address >> self.unused_lsbs;
        let (bank, row, col) = match self.policy {
            AddressPolicy::OpenPage => {
                let col = take_bits(&mut a, self.col_bits);
                let bank = take_bits(&mut a, self.bank_bits);
                let row = take_bits(&mut a, self.row_bits);
                (bank, row, col)
            }
            AddressPolicy::ClosePage => {
                let bank = take_bits(&mut a, self.bank_bits);
                let col = take_bits(&mut a, self.col_bits);
                let row = take_bits(&mut a, self.row_bits);
                (bank, row, col)
            }
            AddressPolicy::RowColumnBank => {
                let bank = take_bits(&mut a, self.bank_bits);
                let col_half = take_bits(&mut a, self.col_bits.saturating_sub(1));
                let row = take_bits(&mut a, self.row_bits);
                (bank, row, col_half * 2)
            }
            AddressPolicy::BankRowColumn => {
                let col_half = take_bits(&mut a, self.col_bits.saturating_sub(1));
                let row = take_bits(&mut a, self.row_bits);
                let bank = take_bits(&mut a, self.bank_bits);
                (bank, row, col_half * 2)
            }
            AddressPolicy::RowBankColumnBankGroupInterleave => {
                let num_groups = (self.num_banks / self.num_banks_per_group).max(1);
                let group_low_width = if num_groups > 1 { 1 } else { 0 };
                let group_low = take_bits(&mut a, group_low_width);
                let col_half = take_bits(&mut a, self.col_bits.saturating_sub(1));
                let bank_in_group = take_bits(&mut a, self.bank_in_group_bits);
                let group_high_width = self.group_bits.saturating_sub(group_low_width);
                let group_high = take_bits(&mut a, group_high_width);
                let row = take_bits(&mut a, self.row_bits);
                let group = group_low | (group_high << group_low_width);
                let bank = group * self.num_banks_per_group as u64 + bank_in_group;
                (bank, row, col_half * 2)
            }
        };
        DecodedAddress {
            rank: 0,
            bank: bank as u32,
            row: row as u32,
            col: col as u32,
        }
    }

    /// Reconstructs an address that would decode to the given fields.
    /// Used by property tests to check decode bijectivity; not needed by
    /// the controller itself since addresses always arrive from upstream.
    pub fn encode(&self, bank: u32, row: u32, col: u32) -> u64 {
        let mut a: u64 = 0;
        let mut shift = 0u32;
        let mut push = |value: u64, width: u32| {
            let masked = if width == 0 { 0 } else { value & ((1u64 << width) - 1) };
            a |= masked << shift;
            shift += width;
        };
        match self.policy {
            AddressPolicy::OpenPage => {
                push(col as u64, self.col_bits);
                push(bank as u64, self.bank_bits);
                push(row as u64, self.row_bits);
            }
            AddressPolicy::ClosePage => {
                push(bank as u64, self.bank_bits);
                push(col as u64, self.col_bits);
                push(row as u64, self.row_bits);
            }
            AddressPolicy::RowColumnBank => {
                push(bank as u64, self.bank_bits);
                push((col / 2) as u64, self.col_bits.saturating_sub(1));
                push(row as u64, self.row_bits);
            }
            AddressPolicy::BankRowColumn => {
                push((col / 2) as u64, self.col_bits.saturating_sub(1));
                push(row as u64, self.row_bits);
                push(bank as u64, self.bank_bits);
            }
            AddressPolicy::RowBankColumnBankGroupInterleave => {
                let num_groups = (self.num_banks / self.num_banks_per_group).max(1);
                let group_low_width = if num_groups > 1 { 1 } else { 0 };
                let group = bank as u64 / self.num_banks_per_group as u64;
                let bank_in_group = bank as u64 % self.num_banks_per_group as u64;
                let group_low = group & ((1u64 << group_low_width) - if group_low_width == 0 { 0 } else { 1 });
                let group_high = group >> group_low_width;
                push(group_low, group_low_width);
                push((col / 2) as u64, self.col_bits.saturating_sub(1));
                push(bank_in_group, self.bank_in_group_bits);
                push(group_high, self.group_bits.saturating_sub(group_low_width));
                push(row as u64, self.row_bits);
            }
        }
        a << self.unused_lsbs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(policy: AddressPolicy) -> AddressDecoder {
        AddressDecoder::new(policy, 8, 4, 65536, 1024, 1, 5).unwrap()
    }

    #[test]
    fn open_page_column_low_bits() {
        let d = decoder(AddressPolicy::OpenPage);
        let a = d.decode(0x0);
        assert_eq!((a.bank, a.row, a.col), (0, 0, 0));
        let a = d.decode(0x20); // one cache line over, still col 1, row 0, bank 0
        assert_eq!(a.col, 1);
    }

    #[test]
    fn close_page_interleaves_banks_first() {
        let d = decoder(AddressPolicy::ClosePage);
        let a0 = d.decode(0x0);
        let a1 = d.decode(0x20);
        assert_eq!(a0.bank, 0);
        assert_eq!(a1.bank, 1);
    }

    #[test]
    fn bijectivity_for_all_policies() {
        for policy in [
            AddressPolicy::OpenPage,
            AddressPolicy::ClosePage,
            AddressPolicy::RowColumnBank,
            AddressPolicy::BankRowColumn,
            AddressPolicy::RowBankColumnBankGroupInterleave,
        ] {
            let d = decoder(policy);
            for bank in 0..8u32 {
                for col_half in 0..8u32 {
                    let col = col_half * 2;
                    let row = 42u32;
                    let addr = d.encode(bank, row, col);
                    let got = d.decode(addr);
                    assert_eq!(got.bank, bank, "policy {policy:?} bank mismatch");
                    assert_eq!(got.row, row, "policy {policy:?} row mismatch");
                    assert_eq!(got.col, col, "policy {policy:?} col mismatch");
                }
            }
        }
    }

    #[test]
    fn rejects_bad_group_divisor() {
        let err = AddressDecoder::new(
            AddressPolicy::RowBankColumnBankGroupInterleave,
            6,
            4,
            65536,
            1024,
            1,
            5,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGeometry(_)));
    }

    #[test]
    fn rejects_zero_geometry() {
        let err = AddressDecoder::new(AddressPolicy::ClosePage, 0, 4, 65536, 1024, 1, 5)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGeometry(_)));
    }
}
