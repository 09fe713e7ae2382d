/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum number of frames a master calibration is built from.
pub const DEFAULT_MIN_IMAGES: usize = 5;

/// Default retry budget per file before the tracker stops scheduling it.
pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Residual significance (in units of expected noise) above which a pixel
/// counts as an outlier in the calibration comparer.
pub const DEFAULT_SIGNAL_TO_NOISE_THRESHOLD: f64 = 6.0;

/// Outlier pixel fraction above which the comparer flags a frame bad.
pub const DEFAULT_ACCEPTABLE_PIXEL_FRACTION: f64 = 0.02;

/// Fraction of saturated pixels above which a frame is flagged bad.
pub const DEFAULT_SATURATION_FRACTION: f64 = 0.05;

/// Fraction of pixels reading exactly 1000 above which a frame is flagged bad.
pub const DEFAULT_THOUSANDS_FRACTION: f64 = 0.2;

/// Pointing offset (arcsec) above which the pointing test reports an error.
pub const DEFAULT_POINTING_TOLERANCE_ARCSEC: f64 = 30.0;

/// Request timeout for the astrometry service.
pub const DEFAULT_ASTROMETRY_TIMEOUT_SECS: u64 = 20;

/// Default astrometry service endpoint.
pub const DEFAULT_ASTROMETRY_URL: &str = "http://astrometry.lco.gtn/catalog/";

/// `WCSERR` value for a successful plate solution.
pub const WCS_SUCCESS: i64 = 0;

/// `WCSERR` value for a failed or skipped plate solution.
pub const WCS_FAILED: i64 = 4;

/// Noise sigmas above the sky for a pixel to belong to a source.
pub const DEFAULT_DETECTION_THRESHOLD_SIGMA: f64 = 5.0;

/// Smallest source, in pixels.
pub const DEFAULT_DETECTION_MIN_AREA: usize = 4;

/// Sources kept per frame for the plate solver.
pub const DEFAULT_MAX_SOURCES: usize = 500;

/// Row-spectrum peak height, in robust sigmas, that counts as pattern noise.
pub const DEFAULT_PATTERN_NOISE_SNR: f64 = 10.0;

/// Low spatial frequencies left out of the pattern-noise search.
pub const DEFAULT_PATTERN_NOISE_SKIP_BINS: usize = 5;

/// Suffix number appended to reduced science frame names.
pub const PROCESSED_SUFFIX: &str = "91";

/// Saturation level used when the header carries no `SATURATE` keyword.
pub const DEFAULT_SATURATION: f64 = 65_535.0;

/// Size of one FITS block in bytes.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// Size of one FITS header card in bytes.
pub const FITS_CARD_SIZE: usize = 80;

/// Keyword prefix of the per-stage status cards, numbered from `L1STAT01`.
pub const STATUS_KEYWORD_PREFIX: &str = "L1STAT";

/// Number of stage status cards a frame can carry.
pub const MAX_STATUS_CARDS: usize = 99;

/// Longest string value, after quote escaping, that fits on one card with
/// both of its quotes.
pub const MAX_CARD_TEXT_LEN: usize = 68;
