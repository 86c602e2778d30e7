use crate::error::IbsError;

/// A genomic interval, 1-based inclusive on both ends. Windows produced by
/// [`tile`] share this shape; they differ only in provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chrom: &str, start: u64, end: u64) -> Result<Self, IbsError> {
        if start < 1 || end < start {
            return Err(IbsError::Precondition {
                chrom: chrom.to_string(),
                start,
                end,
                reason: "coordinates must satisfy 1 <= start <= end".to_string(),
            });
        }
        Ok(Region {
            chrom: chrom.to_string(),
            start,
            end,
        })
    }

    pub fn len_bp(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// Parse a region given either as `chrom:start-end` or as a bare chromosome
/// name. A bare name needs the chromosome's total length, supplied by the
/// caller from whatever listing utility knows the assembly.
pub fn parse_region(raw: &str, chrom_length: Option<u64>) -> Result<Region, IbsError> {
    // rsplit so chromosome names containing ':' keep working
    let parts: Vec<&str> = raw.rsplitn(2, ':').collect();
    if parts.len() == 2 {
        let range_parts: Vec<&str> = parts[0].split('-').collect();
        if range_parts.len() != 2 {
            return Err(IbsError::Config(format!(
                "region range should be `start-end`, got '{}'",
                parts[0]
            )));
        }
        let start = parse_coord(range_parts[0], raw)?;
        let end = parse_coord(range_parts[1], raw)?;
        Region::new(parts[1], start, end)
    } else {
        match chrom_length {
            Some(len) if len >= 1 => Region::new(raw, 1, len),
            Some(len) => Err(IbsError::Config(format!(
                "chromosome length must be >= 1, got {len}"
            ))),
            None => Err(IbsError::Config(format!(
                "region '{raw}' has no coordinates; provide `chrom:start-end` or a chromosome length"
            ))),
        }
    }
}

fn parse_coord(value: &str, raw: &str) -> Result<u64, IbsError> {
    value
        .parse::<u64>()
        .map_err(|_| IbsError::Config(format!("invalid coordinate '{value}' in region '{raw}'")))
}

/// Tile a region into an ordered, gap-free, non-overlapping run of windows.
/// Consecutive windows satisfy `windows[i].end + 1 == windows[i+1].start`;
/// the last window is truncated to the region end. A region shorter than one
/// window yields exactly one window spanning the whole region.
pub fn tile(region: &Region, window_size: u64) -> Result<Vec<Region>, IbsError> {
    if window_size < 1 {
        return Err(IbsError::Config(
            "window size must be >= 1".to_string(),
        ));
    }

    let mut windows = Vec::with_capacity(region.len_bp().div_ceil(window_size) as usize);
    let mut pos = region.start;
    while pos <= region.end {
        let window_end = std::cmp::min(pos + window_size - 1, region.end);
        windows.push(Region {
            chrom: region.chrom.clone(),
            start: pos,
            end: window_end,
        });
        pos = window_end + 1;
    }

    Ok(windows)
}
