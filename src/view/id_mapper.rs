//! Short aliases for generated component ids.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Ids this short are returned unchanged.
const MIN_ALIASED_LEN: usize = 4;

/// Maps long generated component ids to short stable aliases (`j1`,
/// `j2`, ..., base 36). One mapper exists per view alias, so the same
/// generated id always gets the same alias across requests.
#[derive(Debug, Default)]
pub struct IdAliasMapper {
    inner: Mutex<Aliases>,
}

#[derive(Debug, Default)]
struct Aliases {
    by_id: FxHashMap<String, String>,
    next: u64,
}

impl IdAliasMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias_for(&self, id: &str) -> String {
        if id.len() < MIN_ALIASED_LEN {
            return id.to_string();
        }
        let mut inner = self.inner.lock();
        if let Some(alias) = inner.by_id.get(id) {
            return alias.clone();
        }
        let alias = format!("j{}", to_base36(inner.next));
        inner.next += 1;
        inner.by_id.insert(id.to_string(), alias.clone());
        alias
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_are_stable_and_short() {
        let mapper = IdAliasMapper::new();
        let a = mapper.alias_for("j_id9f3c2a_t0");
        let b = mapper.alias_for("j_id9f3c2a_t1");
        assert_eq!(a, "j0");
        assert_eq!(b, "j1");
        assert_eq!(mapper.alias_for("j_id9f3c2a_t0"), "j0");
        assert_eq!(mapper.len(), 2);
    }

    #[test]
    fn test_short_ids_pass_through() {
        let mapper = IdAliasMapper::new();
        assert_eq!(mapper.alias_for("f1"), "f1");
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
