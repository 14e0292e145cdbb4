//! Stream resolution — the metadata API seam and the selection policy
//!
//! The remote metadata/resolution API is an external collaborator: it hands
//! out the two signing-key fragments and, given a signed query, the list of
//! stream candidates. This module defines the trait the orchestrator drives
//! and the pure selection policy applied to the candidates; the concrete
//! HTTP client behind the trait is supplied by the embedding application.

use crate::error::Result;
use crate::types::StreamDescriptor;
use crate::wbi::SignedQuery;
use async_trait::async_trait;

/// Stream candidates returned by the metadata API for one resource
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct ResolvedStreams {
    /// Video candidates, one per quality/codec combination
    #[serde(default)]
    pub video: Vec<StreamDescriptor>,
    /// Audio candidates, one per bitrate
    #[serde(default)]
    pub audio: Vec<StreamDescriptor>,
}

/// External metadata/resolution API
///
/// Treated as opaque: resolution failures are not retried by this core.
/// Implementations should map upstream failures to
/// [`Error::Signing`](crate::Error::Signing) (key retrieval) or
/// [`Error::Resolution`](crate::Error::Resolution) (stream lookup).
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Fetch the platform's two current signing-key fragments.
    ///
    /// The fragments rotate upstream, so they are fetched per run and the
    /// derived mixin key is never cached across runs.
    async fn signing_keys(&self) -> Result<(String, String)>;

    /// Resolve the signed query into concrete stream candidates.
    async fn resolve(&self, query: &SignedQuery) -> Result<ResolvedStreams>;
}

/// Pick one stream from the candidates.
///
/// An exact id match (and codec prefix match, when a codec preference is
/// given) wins; otherwise the highest-bandwidth candidate is the fallback.
/// Returns `None` only for an empty candidate list.
pub fn select_stream<'a>(
    candidates: &'a [StreamDescriptor],
    preferred_id: Option<u32>,
    preferred_codec: Option<&str>,
) -> Option<&'a StreamDescriptor> {
    if let Some(id) = preferred_id {
        let exact = candidates.iter().find(|d| {
            d.id == id
                && preferred_codec
                    .map(|codec| d.codecs.starts_with(codec))
                    .unwrap_or(true)
        });
        if let Some(found) = exact {
            return Some(found);
        }
    }
    candidates.iter().max_by_key(|d| d.bandwidth)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: u32, codecs: &str, bandwidth: u64) -> StreamDescriptor {
        StreamDescriptor {
            id,
            codecs: codecs.to_string(),
            bandwidth,
            url: format!("https://cdn.example/{id}-{codecs}.m4s"),
        }
    }

    #[test]
    fn exact_id_and_codec_match_wins() {
        let candidates = vec![
            descriptor(80, "hev1.1.6.L120.90", 2_500_000),
            descriptor(80, "avc1.640032", 3_000_000),
            descriptor(64, "avc1.64001F", 1_500_000),
        ];

        let chosen = select_stream(&candidates, Some(80), Some("avc1")).unwrap();
        assert_eq!(chosen.codecs, "avc1.640032");
    }

    #[test]
    fn id_match_without_codec_preference_takes_first_candidate() {
        let candidates = vec![
            descriptor(80, "hev1.1.6.L120.90", 2_500_000),
            descriptor(80, "avc1.640032", 3_000_000),
        ];

        let chosen = select_stream(&candidates, Some(80), None).unwrap();
        assert_eq!(chosen.codecs, "hev1.1.6.L120.90", "first id match wins");
    }

    #[test]
    fn missing_id_falls_back_to_highest_bandwidth() {
        let candidates = vec![
            descriptor(32, "avc1.64001E", 800_000),
            descriptor(64, "avc1.64001F", 1_500_000),
            descriptor(16, "avc1.64000C", 300_000),
        ];

        // Quality 116 is not offered for this resource
        let chosen = select_stream(&candidates, Some(116), Some("avc1")).unwrap();
        assert_eq!(chosen.id, 64, "fallback is the highest-bandwidth candidate");
    }

    #[test]
    fn codec_mismatch_falls_back_to_highest_bandwidth() {
        let candidates = vec![
            descriptor(80, "hev1.1.6.L120.90", 2_500_000),
            descriptor(64, "hev1.1.6.L93.90", 1_200_000),
        ];

        let chosen = select_stream(&candidates, Some(80), Some("av01")).unwrap();
        assert_eq!(
            chosen.id, 80,
            "no av01 candidate exists, highest bandwidth wins"
        );
    }

    #[test]
    fn no_preference_selects_highest_bandwidth() {
        let candidates = vec![
            descriptor(30216, "mp4a.40.2", 67_000),
            descriptor(30280, "mp4a.40.2", 320_000),
            descriptor(30232, "mp4a.40.2", 128_000),
        ];

        let chosen = select_stream(&candidates, None, None).unwrap();
        assert_eq!(chosen.id, 30280);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(select_stream(&[], Some(80), None).is_none());
        assert!(select_stream(&[], None, None).is_none());
    }

    #[test]
    fn resolved_streams_deserialize_with_missing_sections() {
        let json = r#"{"video": [{"id": 80, "url": "https://cdn.example/v.m4s"}]}"#;
        let streams: ResolvedStreams = serde_json::from_str(json).unwrap();
        assert_eq!(streams.video.len(), 1);
        assert!(streams.audio.is_empty());
    }
}
