//! Rolling checksum implementation for block matching.
//!
//! This module implements an Adler-32 variant rolling checksum that enables
//! O(1) window sliding for efficient block boundary detection.

/// Rolling checksum state for incremental computation.
///
/// The rolling checksum uses an Adler-32 variant that allows O(1) updates
/// when sliding a window by one byte, growing it at the back, or shrinking
/// it at the front.
///
/// # Algorithm
///
/// The checksum consists of two components:
/// - `a`: Sum of all bytes in the window (mod MOD)
/// - `b`: Weighted sum where each byte is multiplied by its distance from the end
///
/// The final digest combines both: `(b << 16) | a`
///
/// All updates are exact modular arithmetic, so a rolled checksum always
/// equals one computed from scratch over the same window.
///
/// # Example
///
/// ```rust
/// use rdelta::RollingChecksum;
///
/// let mut rolling = RollingChecksum::new(b"hello");
/// rolling.roll(b'h', b'!'); // "ello!"
/// assert_eq!(rolling.digest(), RollingChecksum::new(b"ello!").digest());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingChecksum {
    /// Sum of all bytes in window
    a: u32,
    /// Weighted sum: sum of (`window_size` - i) * byte\[i\]
    b: u32,
    /// Current window size
    count: usize,
}

impl RollingChecksum {
    /// Largest prime less than 2^16.
    const MOD: u32 = 65521;

    /// Create a new rolling checksum over an initial window.
    ///
    /// # Arguments
    ///
    /// * `data` - Initial window contents
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::RollingChecksum;
    ///
    /// let checksum = RollingChecksum::new(b"test data");
    /// assert!(checksum.digest() != 0);
    /// ```
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        let mut checksum = Self::empty();
        for &byte in data {
            checksum.push(byte);
        }
        checksum
    }

    /// Create an empty rolling checksum.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::RollingChecksum;
    ///
    /// let checksum = RollingChecksum::empty();
    /// assert_eq!(checksum.digest(), 0);
    /// assert!(checksum.is_empty());
    /// ```
    #[must_use]
    pub const fn empty() -> Self {
        Self { a: 0, b: 0, count: 0 }
    }

    /// Weight of the front byte, reduced into the modulus.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn front_weight(&self) -> u32 {
        // Reduced below MOD, so the cast is lossless.
        (self.count % Self::MOD as usize) as u32
    }

    /// Roll the window by one byte: remove `old_byte` from the front and
    /// append `new_byte` at the back.
    ///
    /// This operation is O(1) and keeps the window size unchanged.
    ///
    /// # Arguments
    ///
    /// * `old_byte` - Byte leaving the window; must be its current front byte
    /// * `new_byte` - Byte entering at the back of the window
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::RollingChecksum;
    ///
    /// let mut checksum = RollingChecksum::new(b"abcd");
    /// checksum.roll(b'a', b'e'); // Now represents "bcde"
    /// assert_eq!(checksum, RollingChecksum::new(b"bcde"));
    /// ```
    #[inline]
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        let old = u32::from(old_byte);
        let new = u32::from(new_byte);

        self.a = (self.a + Self::MOD - old + new) % Self::MOD;

        let removed = self.front_weight() * old % Self::MOD;
        self.b = (self.b + Self::MOD - removed + self.a) % Self::MOD;
    }

    /// Append a byte to the back of the window.
    ///
    /// # Arguments
    ///
    /// * `byte` - Byte to add to the end of the window
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.a = (self.a + u32::from(byte)) % Self::MOD;
        self.b = (self.b + self.a) % Self::MOD;
        self.count += 1;
    }

    /// Remove `old_byte` from the front of the window, shrinking it by one.
    ///
    /// Used at end of stream, where no new byte replaces the leaving one.
    /// Popping an empty window is a no-op.
    ///
    /// # Arguments
    ///
    /// * `old_byte` - Byte leaving the window; must be its current front byte
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::RollingChecksum;
    ///
    /// let mut checksum = RollingChecksum::new(b"tail");
    /// checksum.pop(b't');
    /// assert_eq!(checksum.digest(), RollingChecksum::new(b"ail").digest());
    /// assert_eq!(checksum.len(), 3);
    /// ```
    #[inline]
    pub fn pop(&mut self, old_byte: u8) {
        if self.count == 0 {
            return;
        }
        let old = u32::from(old_byte);
        let removed = self.front_weight() * old % Self::MOD;

        self.a = (self.a + Self::MOD - old) % Self::MOD;
        self.b = (self.b + Self::MOD - removed) % Self::MOD;
        self.count -= 1;
    }

    /// Get the combined 32-bit digest: `(b << 16) | a`.
    #[inline]
    #[must_use]
    pub const fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Get the current window size.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if the window is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Get the `a` component (simple sum).
    #[inline]
    #[must_use]
    pub const fn sum_a(&self) -> u32 {
        self.a
    }

    /// Get the `b` component (weighted sum).
    #[inline]
    #[must_use]
    pub const fn sum_b(&self) -> u32 {
        self.b
    }
}

impl Default for RollingChecksum {
    fn default() -> Self {
        Self::empty()
    }
}
