//! WBI request signing
//!
//! The upstream platform authenticates metadata requests with a signed query
//! string: parameters are sorted, filtered, percent-encoded, stamped with a
//! unix-seconds `wts` field, and sealed with `w_rid` — the MD5 of the query
//! concatenated with a *mixin key* derived from two rotating key fragments
//! through a fixed permutation table.
//!
//! Everything in this module is pure: no I/O, no shared state, safe for
//! concurrent reuse. Wall-clock time is the only external input, and the
//! clock-injected [`sign_at`] removes even that.

use std::collections::BTreeMap;

/// Fixed permutation table the platform uses to derive the mixin key.
///
/// Indexes into the concatenation of the two key fragments; only the first
/// 32 positions contribute to the key.
const MIXIN_KEY_TABLE: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Characters stripped from parameter values before encoding and signing.
const FILTERED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

/// Ordered parameter set for one signed request
///
/// Iteration is ascending lexicographic by key (the order the signature is
/// computed over). Values are stringified on insert; a non-string value is
/// signed via its string representation (implicit coercion, not an error).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterSet {
    entries: BTreeMap<String, String>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, stringifying the value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    /// Iterate entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters currently in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the set contains no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mixin key derived from the platform's two rotating key fragments
///
/// Usually 32 characters; shorter when the combined fragments do not cover
/// every table index (see [`derive_mixin_key`]). Derived once per signing
/// session and discarded, since the source fragments rotate upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MixinKey(String);

impl MixinKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the derived key in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// True when derivation produced no characters at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fully signed query string, immutable once constructed
///
/// Shape: `k1=v1&k2=v2&...&wts=<ts>&w_rid=<32 lowercase hex chars>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedQuery(String);

impl SignedQuery {
    /// The complete query string, ready to append to a request URL.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SignedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the mixin key from the platform's two key fragments.
///
/// The fragments are concatenated and the permutation table is walked for
/// the 32 output positions. A table index beyond the end of the
/// concatenation is silently skipped, so short fragments yield a key shorter
/// than 32 characters. The skip is preserved verbatim from the upstream
/// scheme for wire compatibility; do not "fix" it without verifying against
/// the platform's reference implementation.
pub fn derive_mixin_key(fragment_a: &str, fragment_b: &str) -> MixinKey {
    let raw: Vec<char> = fragment_a.chars().chain(fragment_b.chars()).collect();
    let key: String = MIXIN_KEY_TABLE
        .iter()
        .take(32)
        .filter_map(|&idx| raw.get(idx))
        .collect();
    MixinKey(key)
}

/// Sign a parameter set at the current wall-clock second.
///
/// Equivalent to [`sign_at`] with `chrono::Utc::now().timestamp()`.
pub fn sign(params: &ParameterSet, mixin_key: &MixinKey) -> SignedQuery {
    sign_at(params, mixin_key, chrono::Utc::now().timestamp())
}

/// Sign a parameter set at an explicit unix timestamp.
///
/// Steps, in order:
/// 1. Inject `wts = unix_ts` into the parameter set (it participates in the
///    key ordering like any other parameter).
/// 2. Iterate entries ascending by key.
/// 3. Strip `! ' ( ) *` from each value, then percent-encode key and value.
/// 4. Join as `k=v` pairs with `&`.
/// 5. Append `w_rid`, the lowercase-hex MD5 of the query string concatenated
///    with the mixin key.
///
/// Identical inputs always produce identical output.
pub fn sign_at(params: &ParameterSet, mixin_key: &MixinKey, unix_ts: i64) -> SignedQuery {
    let mut stamped = params.clone();
    stamped.insert("wts", unix_ts);

    let query = stamped
        .iter()
        .map(|(key, value)| {
            let filtered: String = value.chars().filter(|c| !FILTERED_CHARS.contains(c)).collect();
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&filtered)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    let digest = md5::compute(format!("{}{}", query, mixin_key.as_str()));
    SignedQuery(format!("{query}&w_rid={digest:x}"))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// 64 distinct characters so every table index maps to a unique output.
    const CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    #[test]
    fn mixin_key_permutes_full_length_fragments_to_32_chars() {
        let key = derive_mixin_key(&CHARSET[..32], &CHARSET[32..]);
        assert_eq!(key.len(), 32);
        // First 32 table entries applied to the distinct charset
        assert_eq!(key.as_str(), "uvSC1IXgPyKf6DtjbrFxhJqTdcOnMmpN");
    }

    #[test]
    fn mixin_key_skips_out_of_range_indices_for_short_fragments() {
        // Combined length 10: only table entries < 10 contribute,
        // in table order: 2, 8, 3, 5, 9
        let key = derive_mixin_key("01234", "56789");
        assert_eq!(key.as_str(), "28359");
        assert_eq!(key.len(), 5, "short fragments shorten the key, no panic");
    }

    #[test]
    fn mixin_key_of_empty_fragments_is_empty() {
        let key = derive_mixin_key("", "");
        assert!(key.is_empty());
    }

    #[test]
    fn sign_at_matches_reference_shape_and_digest() {
        let mut params = ParameterSet::new();
        params.insert("bvid", "BV1xx");
        params.insert("cid", 100);
        let key = MixinKey("m".repeat(32));

        let signed = sign_at(&params, &key, 1_700_000_000);

        let expected_query = "bvid=BV1xx&cid=100&wts=1700000000";
        let expected_rid = format!(
            "{:x}",
            md5::compute(format!("{expected_query}{}", "m".repeat(32)))
        );
        assert_eq!(
            signed.as_str(),
            format!("{expected_query}&w_rid={expected_rid}")
        );
        assert_eq!(expected_rid.len(), 32, "w_rid is 32 lowercase hex chars");
        assert!(expected_rid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn signing_is_pure_for_a_frozen_clock() {
        let mut params = ParameterSet::new();
        params.insert("bvid", "BV1GJ411x7h7");
        params.insert("cid", 239927346u64);
        params.insert("qn", 80);
        let key = derive_mixin_key(&CHARSET[..32], &CHARSET[32..]);

        let first = sign_at(&params, &key, 1_700_000_000);
        let second = sign_at(&params, &key, 1_700_000_000);
        assert_eq!(first, second, "identical inputs must yield identical output");

        let later = sign_at(&params, &key, 1_700_000_001);
        assert_ne!(first, later, "the timestamp participates in the signature");
    }

    #[test]
    fn keys_are_ordered_ascending_with_wts_interleaved() {
        let mut params = ParameterSet::new();
        params.insert("zzz", "last");
        params.insert("aaa", "first");
        // "wts" sorts between "aaa" and "zzz"
        let signed = sign_at(&params, &MixinKey("k".repeat(32)), 1_700_000_000);
        let query = signed.as_str().rsplit_once("&w_rid=").unwrap().0;
        assert_eq!(query, "aaa=first&wts=1700000000&zzz=last");
    }

    #[test]
    fn filtered_characters_are_stripped_before_encoding() {
        let mut params = ParameterSet::new();
        params.insert("name", "a!b'c(d)e*f");
        let signed = sign_at(&params, &MixinKey("k".repeat(32)), 1_700_000_000);

        assert!(
            signed.as_str().contains("name=abcdef"),
            "filtered characters must be absent from the signed value: {}",
            signed
        );
        for c in ['!', '\'', '(', ')', '*'] {
            assert!(
                !signed.as_str().contains(c),
                "character {c:?} leaked into the signed query"
            );
        }
    }

    #[test]
    fn values_are_percent_encoded() {
        let mut params = ParameterSet::new();
        params.insert("keyword", "hello world/测试");
        let signed = sign_at(&params, &MixinKey("k".repeat(32)), 1_700_000_000);
        assert!(signed.as_str().contains("keyword=hello%20world%2F"));
        assert!(
            !signed.as_str().contains(' '),
            "raw spaces must never appear in the wire query"
        );
    }

    #[test]
    fn numeric_values_are_coerced_to_strings() {
        let mut params = ParameterSet::new();
        params.insert("cid", 239927346u64);
        params.insert("fnval", 4048);
        params.insert("fourk", 1);
        let signed = sign_at(&params, &MixinKey("k".repeat(32)), 1_700_000_000);
        assert!(signed.as_str().starts_with("cid=239927346&fnval=4048&fourk=1&wts="));
    }

    #[test]
    fn query_portion_reparses_to_the_original_parameters() {
        let mut params = ParameterSet::new();
        params.insert("bvid", "BV1xx411c7mD");
        params.insert("cid", 12345);
        params.insert("qn", 116);
        let signed = sign_at(&params, &MixinKey("k".repeat(32)), 1_700_000_000);

        let query = signed.as_str().rsplit_once("&w_rid=").unwrap().0;
        let mut reparsed = ParameterSet::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            let k = urlencoding::decode(k).unwrap();
            let v = urlencoding::decode(v).unwrap();
            if k != "wts" {
                reparsed.insert(k.into_owned(), v.into_owned());
            }
        }
        assert_eq!(reparsed, params);
    }

    #[test]
    fn sign_uses_the_current_clock() {
        let mut params = ParameterSet::new();
        params.insert("bvid", "BV1xx");
        let key = MixinKey("m".repeat(32));

        let before = chrono::Utc::now().timestamp();
        let signed = sign(&params, &key);
        let after = chrono::Utc::now().timestamp();

        let query = signed.as_str().rsplit_once("&w_rid=").unwrap().0;
        let wts: i64 = query
            .split('&')
            .find_map(|p| p.strip_prefix("wts="))
            .unwrap()
            .parse()
            .unwrap();
        assert!((before..=after).contains(&wts));
    }
}
