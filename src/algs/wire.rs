//! Fixed little-endian wire types for halo and mesh exchanges.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a byte buffer into owned records; fails when the length is not a
/// whole number of records.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(format!(
            "payload of {} bytes is not a multiple of the {size}-byte record",
            bytes.len()
        ));
    }
    // copy into typed storage; the input needs no particular alignment
    let mut out = vec![T::zeroed(); bytes.len() / size];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Count of following records.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global cell id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCellId {
    pub id_le: u64,
}

impl WireCellId {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// A scalar field value carried as its IEEE-754 bit pattern.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}

impl WireScalar {
    pub fn of(value: f64) -> Self {
        Self {
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(WireCount, u64);
    assert_eq_size!(WireCellId, u64);
    assert_eq_size!(WireScalar, u64);

    #[test]
    fn scalar_survives_the_wire() {
        let values = [WireScalar::of(-1.25), WireScalar::of(f64::MIN_POSITIVE)];
        let decoded: Vec<WireScalar> = decode_records(cast_slice(&values)).unwrap();
        assert_eq!(decoded[0].get(), -1.25);
        assert_eq!(decoded[1].get(), f64::MIN_POSITIVE);
    }

    #[test]
    fn ragged_payload_is_rejected() {
        assert!(decode_records::<WireCellId>(&[0u8; 9]).is_err());
    }
}
