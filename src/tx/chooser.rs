//! Coin selection.
//!
//! The policy is closest-value: repeatedly take the candidate whose value is
//! nearest the still-unpaid amount. It is neither optimal nor
//! privacy-preserving, but it is the wallet's historical behavior and is kept
//! behind [`SelectionPolicy`] so callers can treat it as replaceable.

use serde::{Deserialize, Serialize};

use crate::api::Utxo;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Admit UTXOs with zero confirmations.
    pub use_unconfirmed: bool,
    /// Select whole per-address aggregates instead of single UTXOs.
    pub use_full_address_utxos: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Picked UTXOs, in pick order.
    pub utxos: Vec<Utxo>,
    /// Cumulative picked value minus the target.
    pub change: u64,
    /// Distinct input addresses, in pick order.
    pub input_addresses: Vec<String>,
}

/// Picks UTXOs from `pool` until their cumulative value covers `target`.
/// Zero-value outputs are never candidates. Fails with the remaining
/// shortfall when the pool runs dry.
pub fn choose_utxos(pool: &[Utxo], target: u64, policy: SelectionPolicy) -> Result<Selection> {
    let candidates: Vec<&Utxo> = pool
        .iter()
        .filter(|u| u.value > 0)
        .filter(|u| policy.use_unconfirmed || u.is_confirmed())
        .collect();

    let picked = if policy.use_full_address_utxos {
        pick_by_address(candidates, target)
    } else {
        pick_by_utxo(candidates, target)
    }?;

    let total: u64 = picked.iter().map(|u| u.value).sum();
    let mut input_addresses = Vec::new();
    for utxo in &picked {
        if !input_addresses.contains(&utxo.address) {
            input_addresses.push(utxo.address.clone());
        }
    }
    Ok(Selection {
        change: total - target,
        utxos: picked,
        input_addresses,
    })
}

fn pick_by_utxo(mut candidates: Vec<&Utxo>, target: u64) -> Result<Vec<Utxo>> {
    let mut picked = Vec::new();
    let mut total: u64 = 0;
    while total < target {
        let remaining = target - total;
        let index = closest_index(candidates.iter().map(|u| u.value), remaining)
            .ok_or(Error::InsufficientFunds { shortfall: remaining })?;
        let utxo = candidates.remove(index);
        total += utxo.value;
        picked.push(utxo.clone());
    }
    Ok(picked)
}

fn pick_by_address(candidates: Vec<&Utxo>, target: u64) -> Result<Vec<Utxo>> {
    // aggregate per address, keeping first-occurrence order for tie breaks
    let mut groups: Vec<(String, u64, Vec<&Utxo>)> = Vec::new();
    for utxo in candidates {
        if let Some(pos) = groups.iter().position(|(addr, _, _)| *addr == utxo.address) {
            let (_, value, members) = &mut groups[pos];
            *value += utxo.value;
            members.push(utxo);
        } else {
            groups.push((utxo.address.clone(), utxo.value, vec![utxo]));
        }
    }

    let mut picked = Vec::new();
    let mut total: u64 = 0;
    while total < target {
        let remaining = target - total;
        let index = closest_index(groups.iter().map(|(_, value, _)| *value), remaining)
            .ok_or(Error::InsufficientFunds { shortfall: remaining })?;
        let (_, value, members) = groups.remove(index);
        total += value;
        picked.extend(members.into_iter().cloned());
    }
    Ok(picked)
}

/// Index of the value closest to `remaining`; ties go to the first
/// occurrence. `None` on an empty iterator.
fn closest_index(values: impl Iterator<Item = u64>, remaining: u64) -> Option<usize> {
    values
        .enumerate()
        .min_by_key(|(_, value)| value.abs_diff(remaining))
        .map(|(index, _)| index)
}
