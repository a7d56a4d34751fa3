//! Concrete operation vectors for the built-in fixed-width arithmetic
//! types plus `str`, grounded on `gdk_atoms.c`'s comparator convention:
//! `(l > r) - (l < r)` with nil sorting first, and NaN substituting for
//! nil in floating point comparisons.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{AtomDescriptor, AtomRegistry, Storage};
use crate::error::{Error, Result};

macro_rules! int_atom {
    ($name:literal, $id:expr, $ty:ty, $storage:expr, $nil:expr) => {{
        fn cmp(l: &[u8], r: &[u8]) -> Ordering {
            let lv = <$ty>::from_le_bytes(l.try_into().unwrap());
            let rv = <$ty>::from_le_bytes(r.try_into().unwrap());
            lv.cmp(&rv)
        }
        fn hash(v: &[u8]) -> u64 {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        }
        fn nil() -> Vec<u8> {
            let n: $ty = $nil;
            n.to_le_bytes().to_vec()
        }
        fn from_str(s: &str) -> Result<Vec<u8>> {
            let v: $ty = s
                .trim()
                .parse()
                .map_err(|_| Error::TypeMismatch(format!("cannot parse {:?} as {}", s, $name)))?;
            Ok(v.to_le_bytes().to_vec())
        }
        fn to_str(v: &[u8]) -> String {
            let n = <$ty>::from_le_bytes(v.try_into().unwrap());
            n.to_string()
        }
        fn read(v: &[u8]) -> Vec<u8> {
            v.to_vec()
        }
        fn write(v: &[u8]) -> Vec<u8> {
            v.to_vec()
        }
        AtomDescriptor {
            id: $id,
            name: $name,
            storage: $storage,
            linear: true,
            is_variable: false,
            cmp,
            hash,
            nil,
            from_str,
            to_str,
            read,
            write,
            fix: None,
            unfix: None,
        }
    }};
}

macro_rules! float_atom {
    ($name:literal, $id:expr, $ty:ty, $storage:expr) => {{
        fn cmp(l: &[u8], r: &[u8]) -> Ordering {
            let lv = <$ty>::from_le_bytes(l.try_into().unwrap());
            let rv = <$ty>::from_le_bytes(r.try_into().unwrap());
            let ln = lv.is_nan();
            let rn = rv.is_nan();
            match (ln, rn) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => lv.partial_cmp(&rv).unwrap_or(Ordering::Equal),
            }
        }
        fn hash(v: &[u8]) -> u64 {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        }
        fn nil() -> Vec<u8> {
            let n: $ty = <$ty>::NAN;
            n.to_le_bytes().to_vec()
        }
        fn from_str(s: &str) -> Result<Vec<u8>> {
            let v: $ty = s
                .trim()
                .parse()
                .map_err(|_| Error::TypeMismatch(format!("cannot parse {:?} as {}", s, $name)))?;
            Ok(v.to_le_bytes().to_vec())
        }
        fn to_str(v: &[u8]) -> String {
            let n = <$ty>::from_le_bytes(v.try_into().unwrap());
            if n.is_nan() {
                "nil".to_string()
            } else {
                n.to_string()
            }
        }
        fn read(v: &[u8]) -> Vec<u8> {
            v.to_vec()
        }
        fn write(v: &[u8]) -> Vec<u8> {
            v.to_vec()
        }
        AtomDescriptor {
            id: $id,
            name: $name,
            storage: $storage,
            linear: true,
            is_variable: false,
            cmp,
            hash,
            nil,
            from_str,
            to_str,
            read,
            write,
            fix: None,
            unfix: None,
        }
    }};
}

fn bit_cmp(l: &[u8], r: &[u8]) -> Ordering {
    l[0].cmp(&r[0])
}
fn bit_hash(v: &[u8]) -> u64 {
    v[0] as u64
}
fn bit_nil() -> Vec<u8> {
    vec![0x80]
}
fn bit_from_str(s: &str) -> Result<Vec<u8>> {
    match s.trim() {
        "0" | "false" => Ok(vec![0]),
        "1" | "true" => Ok(vec![1]),
        _ => Err(Error::TypeMismatch(format!("cannot parse {s:?} as bit"))),
    }
}
fn bit_to_str(v: &[u8]) -> String {
    if v == bit_nil() {
        "nil".to_string()
    } else {
        (v[0] != 0).to_string()
    }
}
fn bit_read(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}
fn bit_write(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

fn oid_cmp(l: &[u8], r: &[u8]) -> Ordering {
    let lv = u64::from_le_bytes(l.try_into().unwrap());
    let rv = u64::from_le_bytes(r.try_into().unwrap());
    lv.cmp(&rv)
}
fn oid_hash(v: &[u8]) -> u64 {
    u64::from_le_bytes(v.try_into().unwrap())
}
fn oid_nil() -> Vec<u8> {
    u64::MAX.to_le_bytes().to_vec()
}
fn oid_from_str(s: &str) -> Result<Vec<u8>> {
    let v: u64 = s
        .trim()
        .parse()
        .map_err(|_| Error::TypeMismatch(format!("cannot parse {s:?} as oid")))?;
    Ok(v.to_le_bytes().to_vec())
}
fn oid_to_str(v: &[u8]) -> String {
    let n = u64::from_le_bytes(v.try_into().unwrap());
    if n == u64::MAX {
        "nil".to_string()
    } else {
        n.to_string()
    }
}
fn oid_read(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}
fn oid_write(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

fn ptr_cmp(l: &[u8], r: &[u8]) -> Ordering {
    let lv = u64::from_le_bytes(l.try_into().unwrap());
    let rv = u64::from_le_bytes(r.try_into().unwrap());
    lv.cmp(&rv)
}
fn ptr_hash(v: &[u8]) -> u64 {
    u64::from_le_bytes(v.try_into().unwrap())
}
fn ptr_nil() -> Vec<u8> {
    0u64.to_le_bytes().to_vec()
}
fn ptr_from_str(_: &str) -> Result<Vec<u8>> {
    Err(Error::TypeMismatch("ptr has no textual representation".into()))
}
fn ptr_to_str(v: &[u8]) -> String {
    format!("{:#x}", u64::from_le_bytes(v.try_into().unwrap()))
}
fn ptr_read(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}
fn ptr_write(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

fn uuid_cmp(l: &[u8], r: &[u8]) -> Ordering {
    l.cmp(r)
}
fn uuid_hash(v: &[u8]) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}
fn uuid_nil() -> Vec<u8> {
    vec![0u8; 16]
}
fn uuid_from_str(s: &str) -> Result<Vec<u8>> {
    uuid::Uuid::parse_str(s.trim())
        .map(|u| u.as_bytes().to_vec())
        .map_err(|e| Error::TypeMismatch(format!("cannot parse {s:?} as uuid: {e}")))
}
fn uuid_to_str(v: &[u8]) -> String {
    if v == uuid_nil() {
        "nil".to_string()
    } else {
        uuid::Uuid::from_bytes(v.try_into().unwrap()).to_string()
    }
}
fn uuid_read(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}
fn uuid_write(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

/// The byte 0x80 is not a valid UTF-8 lead byte, so it can never collide
/// with a real string's first byte; used as the nil sentinel for a lone
/// `str` atom value outside of the offset-heap machinery.
fn str_nil() -> Vec<u8> {
    vec![0x80]
}
fn str_cmp(l: &[u8], r: &[u8]) -> Ordering {
    let ln = l == str_nil();
    let rn = r == str_nil();
    match (ln, rn) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => l.cmp(r),
    }
}
fn str_hash(v: &[u8]) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}
fn str_from_str(s: &str) -> Result<Vec<u8>> {
    Ok(s.as_bytes().to_vec())
}
fn str_to_str(v: &[u8]) -> String {
    if v == str_nil() {
        "nil".to_string()
    } else {
        String::from_utf8_lossy(v).to_string()
    }
}
fn str_read(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}
fn str_write(v: &[u8]) -> Vec<u8> {
    v.to_vec()
}

pub fn register_all(reg: &mut AtomRegistry) {
    reg.register(AtomDescriptor {
        id: 0,
        name: "void",
        storage: Storage::Void,
        linear: true,
        is_variable: false,
        cmp: |_, _| Ordering::Equal,
        hash: |_| 0,
        nil: Vec::new,
        from_str: |_| Ok(Vec::new()),
        to_str: |_| String::new(),
        read: |v| v.to_vec(),
        write: |v| v.to_vec(),
        fix: None,
        unfix: None,
    })
    .unwrap();

    reg.register(AtomDescriptor {
        id: 1,
        name: "bit",
        storage: Storage::Bit,
        linear: true,
        is_variable: false,
        cmp: bit_cmp,
        hash: bit_hash,
        nil: bit_nil,
        from_str: bit_from_str,
        to_str: bit_to_str,
        read: bit_read,
        write: bit_write,
        fix: None,
        unfix: None,
    })
    .unwrap();

    reg.register(int_atom!("bte", 2, i8, Storage::Int8, i8::MIN)).unwrap();
    reg.register(int_atom!("sht", 3, i16, Storage::Int16, i16::MIN)).unwrap();
    reg.register(int_atom!("int", 4, i32, Storage::Int32, i32::MIN)).unwrap();
    reg.register(int_atom!("lng", 5, i64, Storage::Int64, i64::MIN)).unwrap();
    reg.register(int_atom!("hge", 6, i128, Storage::Int128, i128::MIN)).unwrap();
    reg.register(float_atom!("flt", 7, f32, Storage::Float32)).unwrap();
    reg.register(float_atom!("dbl", 8, f64, Storage::Float64)).unwrap();

    reg.register(AtomDescriptor {
        id: 9,
        name: "oid",
        storage: Storage::Int64,
        linear: true,
        is_variable: false,
        cmp: oid_cmp,
        hash: oid_hash,
        nil: oid_nil,
        from_str: oid_from_str,
        to_str: oid_to_str,
        read: oid_read,
        write: oid_write,
        fix: None,
        unfix: None,
    })
    .unwrap();

    reg.register(AtomDescriptor {
        id: 10,
        name: "ptr",
        storage: Storage::Pointer,
        linear: true,
        is_variable: false,
        cmp: ptr_cmp,
        hash: ptr_hash,
        nil: ptr_nil,
        from_str: ptr_from_str,
        to_str: ptr_to_str,
        read: ptr_read,
        write: ptr_write,
        fix: None,
        unfix: None,
    })
    .unwrap();

    reg.register(AtomDescriptor {
        id: 11,
        name: "uuid",
        storage: Storage::Uuid,
        linear: true,
        is_variable: false,
        cmp: uuid_cmp,
        hash: uuid_hash,
        nil: uuid_nil,
        from_str: uuid_from_str,
        to_str: uuid_to_str,
        read: uuid_read,
        write: uuid_write,
        fix: None,
        unfix: None,
    })
    .unwrap();

    reg.register(AtomDescriptor {
        id: 12,
        name: "str",
        storage: Storage::StringOffset,
        linear: true,
        is_variable: true,
        cmp: str_cmp,
        hash: str_hash,
        nil: str_nil,
        from_str: str_from_str,
        to_str: str_to_str,
        read: str_read,
        write: str_write,
        fix: None,
        unfix: None,
    })
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::super::AtomRegistry;

    #[test]
    fn int_nil_sorts_first() {
        let reg = AtomRegistry::new();
        let id = reg.get(reg.lookup_by_name("int").unwrap()).unwrap();
        let nil = id.nil_bytes();
        let one = 1i32.to_le_bytes().to_vec();
        assert_eq!((id.cmp)(&nil, &one), std::cmp::Ordering::Less);
        assert_eq!((id.cmp)(&nil, &nil), std::cmp::Ordering::Equal);
    }

    #[test]
    fn float_nan_is_nil_and_sorts_first() {
        let reg = AtomRegistry::new();
        let d = reg.get(reg.lookup_by_name("dbl").unwrap()).unwrap();
        let nan = f64::NAN.to_le_bytes().to_vec();
        let one = 1.0f64.to_le_bytes().to_vec();
        assert_eq!((d.cmp)(&nan, &one), std::cmp::Ordering::Less);
        assert!(d.is_nil(&nan));
    }

    #[test]
    fn uuid_roundtrip() {
        let reg = AtomRegistry::new();
        let u = reg.get(reg.lookup_by_name("uuid").unwrap()).unwrap();
        let bytes = (u.from_str)("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!((u.to_str)(&bytes), "550e8400-e29b-41d4-a716-446655440000");
    }
}
