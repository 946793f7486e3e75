//! The asset discovery and download reconciliation pipeline.
//!
//! One configurable pipeline: frame enumeration, per-frame discovery,
//! size resolution, threshold filter, cross-frame dedup, retry controller,
//! and a download orchestrator with an explicit, ordered strategy chain.

pub mod collect;
pub mod discover;
pub mod download;
pub mod probe;
pub mod retry;
pub mod sanitize;

use std::path::PathBuf;

/// How a discovered URL is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// An in-memory `blob:` handle, valid only inside the frame that
    /// created it.
    Ephemeral,
    /// A network-addressable URL.
    Network,
}

impl ResourceClass {
    /// Classify a URL by scheme. Byte-wise comparison; URLs with
    /// multibyte characters anywhere must not trip a char boundary.
    pub fn of(url: &str) -> Self {
        let is_blob = url
            .as_bytes()
            .get(..5)
            .map_or(false, |p| p.eq_ignore_ascii_case(b"blob:"));
        if is_blob {
            ResourceClass::Ephemeral
        } else {
            ResourceClass::Network
        }
    }
}

/// A URL discovered during a frame scan, before filtering.
///
/// `size` is `None` until the resolver has run; a resolved size of 0 covers
/// both a genuinely empty resource and a failed probe (the two are
/// indistinguishable at this layer).
#[derive(Debug, Clone)]
pub struct CandidateAsset {
    pub url: String,
    pub frame_index: usize,
    pub size: Option<u64>,
}

/// A candidate that passed the size threshold and cross-frame dedup.
/// URLs are unique across one discovery pass; the frame index is the
/// earliest frame the URL was seen in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedAsset {
    pub url: String,
    pub frame_index: usize,
    pub size: u64,
}

impl RetainedAsset {
    pub fn class(&self) -> ResourceClass {
        ResourceClass::of(&self.url)
    }
}

/// A download mechanism, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Dereference the blob inside its owning frame and carry the bytes
    /// across the execution boundary.
    InlineExtraction,
    /// Synthesize an anchor click inside the owning frame and wait for the
    /// browser's download.
    TriggeredDownload,
    /// Direct request with the session's cookies.
    AuthenticatedFetch,
}

impl Strategy {
    /// The ordered strategy chain for a URL class. Ineligible strategies
    /// never appear: blobs cannot be fetched out-of-band, and network URLs
    /// have nothing to extract inline.
    pub fn chain_for(class: ResourceClass) -> &'static [Strategy] {
        match class {
            ResourceClass::Ephemeral => {
                &[Strategy::InlineExtraction, Strategy::TriggeredDownload]
            }
            ResourceClass::Network => {
                &[Strategy::TriggeredDownload, Strategy::AuthenticatedFetch]
            }
        }
    }
}

/// Terminal record of one asset's trip through the strategy chain.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub asset: RetainedAsset,
    /// The strategy that succeeded, or `None` when the chain was exhausted.
    pub strategy: Option<Strategy>,
    pub success: bool,
    pub saved_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_blob_case_insensitive() {
        assert_eq!(ResourceClass::of("blob:https://a/b"), ResourceClass::Ephemeral);
        assert_eq!(ResourceClass::of("BLOB:https://a/b"), ResourceClass::Ephemeral);
        assert_eq!(ResourceClass::of("https://a/b.wav"), ResourceClass::Network);
        assert_eq!(ResourceClass::of(""), ResourceClass::Network);
    }

    #[test]
    fn test_classify_multibyte_urls() {
        // A multibyte character straddling the scheme-length boundary must
        // classify, not panic.
        assert_eq!(ResourceClass::of("aaaaé.wav"), ResourceClass::Network);
        assert_eq!(ResourceClass::of("ééé"), ResourceClass::Network);
        assert_eq!(
            ResourceClass::of("https://h/ré union.wav"),
            ResourceClass::Network
        );
        assert_eq!(
            ResourceClass::of("blob:https://h/é"),
            ResourceClass::Ephemeral
        );
    }

    #[test]
    fn test_chain_order_for_blobs() {
        let chain = Strategy::chain_for(ResourceClass::Ephemeral);
        assert_eq!(
            chain,
            &[Strategy::InlineExtraction, Strategy::TriggeredDownload]
        );
        // Out-of-band fetch is never eligible for a context-bound handle.
        assert!(!chain.contains(&Strategy::AuthenticatedFetch));
    }

    #[test]
    fn test_chain_order_for_network_urls() {
        let chain = Strategy::chain_for(ResourceClass::Network);
        assert_eq!(
            chain,
            &[Strategy::TriggeredDownload, Strategy::AuthenticatedFetch]
        );
        assert!(!chain.contains(&Strategy::InlineExtraction));
    }
}
