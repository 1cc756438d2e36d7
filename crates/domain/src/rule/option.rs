use std::fmt;

/// TCP option to be inserted by an `add` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOptionValue {
    pub kind: u8,
    pub value: Vec<u8>,
}

/// 256-bit set of TCP option kinds to strip.
///
/// In blacklist mode a set bit marks an option to remove. The first
/// negated `strip` switches to whitelist mode: every bit starts set and
/// each named option is cleared (kept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionStripList {
    bits: [u64; 4],
    whitelist: bool,
    active: bool,
}

impl OptionStripList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a strip of `kind` (`None` = every option). Returns `false`
    /// when the polarity conflicts with earlier strips.
    pub fn record(&mut self, kind: Option<u8>, negated: bool) -> bool {
        if self.active {
            if self.whitelist != negated {
                return false;
            }
        } else {
            self.active = true;
            if negated {
                self.whitelist = true;
                self.bits = [u64::MAX; 4];
            }
        }
        let keep = self.whitelist;
        match kind {
            Some(k) => self.set(k, !keep),
            None => self.bits = if keep { [0; 4] } else { [u64::MAX; 4] },
        }
        true
    }

    fn set(&mut self, kind: u8, on: bool) {
        let word = usize::from(kind / 64);
        let bit = 1u64 << (kind % 64);
        if on {
            self.bits[word] |= bit;
        } else {
            self.bits[word] &= !bit;
        }
    }

    pub fn strips(&self, kind: u8) -> bool {
        self.bits[usize::from(kind / 64)] & (1u64 << (kind % 64)) != 0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_whitelist(&self) -> bool {
        self.whitelist
    }

    pub fn kinds(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|k| self.strips(*k))
    }
}

impl fmt::Display for OptionStripList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listed = |strip: bool| {
            (0..=u8::MAX)
                .filter(|k| self.strips(*k) == strip)
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        if self.whitelist {
            write!(f, "strip all except [{}]", listed(false))
        } else {
            write!(f, "strip [{}]", listed(true))
        }
    }
}
