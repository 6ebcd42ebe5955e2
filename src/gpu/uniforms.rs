//! Typed uniform values and redundant-write elimination.
//!
//! Filters stage parameter changes as [`UniformValue`]s resolved to
//! reflected block offsets; the [`UniformStateCache`] decides whether a
//! staged value actually needs a queue write. Cache entries are keyed by
//! (program, slot) because unrelated programs reuse the same slot numbers.

use std::collections::HashMap;

/// Identity of a linked shader program, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) u64);

/// A value destined for one member of a filter's uniform block.
///
/// Encoding follows WGSL uniform address-space rules: vec3 packs 12 bytes,
/// matrix columns are padded to 16, and float arrays are packed four to a
/// `vec4` (shaders index `arr[i / 4u][i % 4u]`).
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Point([f32; 2]),
    Size([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([[f32; 3]; 3]),
    Mat4([[f32; 4]; 4]),
    FloatArray(Vec<f32>),
}

impl UniformValue {
    /// Serialize into the byte layout the shader-side member uses.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Point(v) | UniformValue::Size(v) => {
                bytemuck::cast_slice(v).to_vec()
            }
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Mat3(columns) => {
                let mut bytes = Vec::with_capacity(48);
                for column in columns {
                    bytes.extend_from_slice(bytemuck::cast_slice(column));
                    bytes.extend_from_slice(&[0u8; 4]);
                }
                bytes
            }
            UniformValue::Mat4(columns) => {
                let mut bytes = Vec::with_capacity(64);
                for column in columns {
                    bytes.extend_from_slice(bytemuck::cast_slice(column));
                }
                bytes
            }
            UniformValue::FloatArray(values) => {
                let padded = values.len().div_ceil(4) * 4;
                let mut bytes = Vec::with_capacity(padded * 4);
                bytes.extend_from_slice(bytemuck::cast_slice(values));
                bytes.resize(padded * 4, 0);
                bytes
            }
        }
    }
}

/// Last-written uniform bytes per (program, slot), plus the active-program
/// tracker that forces resubmission after a program switch.
#[derive(Default)]
pub struct UniformStateCache {
    values: HashMap<(ProgramId, usize), Vec<u8>>,
    active: Option<ProgramId>,
    writes: u64,
}

impl UniformStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `program` as the one bound on the stream. Regaining the
    /// active slot after another program held it drops the program's
    /// cached entries, so every value is rewritten on next use.
    pub fn activate_program(&mut self, program: ProgramId) {
        if self.active == Some(program) {
            return;
        }
        self.values.retain(|(owner, _), _| *owner != program);
        self.active = Some(program);
    }

    /// Decide whether `bytes` for (program, slot) must reach the GPU.
    /// Returns `false` when the cached value is bit-identical; otherwise
    /// records the value and counts a write.
    pub fn set(&mut self, program: ProgramId, slot: usize, bytes: &[u8]) -> bool {
        match self.values.get(&(program, slot)) {
            Some(previous) if previous.as_slice() == bytes => false,
            _ => {
                self.values.insert((program, slot), bytes.to_vec());
                self.writes += 1;
                true
            }
        }
    }

    /// Drop everything cached for a program (e.g. on node teardown).
    pub fn forget_program(&mut self, program: ProgramId) {
        self.values.retain(|(owner, _), _| *owner != program);
        if self.active == Some(program) {
            self.active = None;
        }
    }

    /// Number of writes this cache has let through.
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_bytes(v: f32) -> Vec<u8> {
        UniformValue::Float(v).encode()
    }

    #[test]
    fn test_identical_set_writes_once() {
        let mut cache = UniformStateCache::new();
        let program = ProgramId(1);
        cache.activate_program(program);

        assert!(cache.set(program, 0, &float_bytes(0.5)));
        assert!(!cache.set(program, 0, &float_bytes(0.5)));
        assert_eq!(cache.write_count(), 1);

        assert!(cache.set(program, 0, &float_bytes(0.75)));
        assert_eq!(cache.write_count(), 2);
    }

    #[test]
    fn test_programs_do_not_share_slots() {
        let mut cache = UniformStateCache::new();
        let a = ProgramId(1);
        let b = ProgramId(2);

        assert!(cache.set(a, 3, &float_bytes(1.0)));
        assert!(cache.set(b, 3, &float_bytes(1.0)));
        assert_eq!(cache.write_count(), 2);
    }

    #[test]
    fn test_program_switch_invalidates() {
        let mut cache = UniformStateCache::new();
        let a = ProgramId(1);
        let b = ProgramId(2);

        cache.activate_program(a);
        assert!(cache.set(a, 0, &float_bytes(2.0)));

        cache.activate_program(b);
        assert!(cache.set(b, 0, &float_bytes(2.0)));

        // A lost the active slot; its state must be resubmitted.
        cache.activate_program(a);
        assert!(cache.set(a, 0, &float_bytes(2.0)));
        assert_eq!(cache.write_count(), 3);
    }

    #[test]
    fn test_reactivating_same_program_keeps_cache() {
        let mut cache = UniformStateCache::new();
        let a = ProgramId(7);

        cache.activate_program(a);
        assert!(cache.set(a, 1, &float_bytes(4.0)));
        cache.activate_program(a);
        assert!(!cache.set(a, 1, &float_bytes(4.0)));
    }

    #[test]
    fn test_encoding_sizes() {
        assert_eq!(UniformValue::Float(0.0).encode().len(), 4);
        assert_eq!(UniformValue::Int(0).encode().len(), 4);
        assert_eq!(UniformValue::Point([0.0; 2]).encode().len(), 8);
        assert_eq!(UniformValue::Vec3([0.0; 3]).encode().len(), 12);
        assert_eq!(UniformValue::Vec4([0.0; 4]).encode().len(), 16);
        assert_eq!(UniformValue::Mat3([[0.0; 3]; 3]).encode().len(), 48);
        assert_eq!(UniformValue::Mat4([[0.0; 4]; 4]).encode().len(), 64);
    }

    #[test]
    fn test_float_array_packs_to_vec4_stride() {
        let arr = UniformValue::FloatArray(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let bytes = arr.encode();
        assert_eq!(bytes.len(), 32, "5 floats occupy two vec4s");
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(&floats[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(&floats[5..], &[0.0, 0.0, 0.0]);
    }
}
