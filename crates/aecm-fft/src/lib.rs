#![doc = include_str!("../README.md")]

mod complex_fft;
mod tables;

use thiserror::Error;

/// Largest supported transform order; the complex FFT core is bounded by
/// the 1024-entry sine table it shares across all orders.
pub const MAX_FFT_ORDER: u32 = 10;

const MAX_N: usize = 1 << MAX_FFT_ORDER;

/// Error returned by [`RealFft::new`] for an out-of-range order.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("FFT order {order} out of range (expected 1 < order <= {max})", max = MAX_FFT_ORDER)]
pub struct OrderError {
    order: u32,
}

/// A fixed-point real FFT of order `1 < order <= 10` (`N = 2^order`).
///
/// Builds on a full-size complex FFT: the real input is embedded with a
/// zero imaginary part, transformed, and only the first `N/2 + 1` complex
/// bins are kept (the rest follow by conjugate symmetry). The packed
/// spectrum layout is `[R0, 0, R1, I1, ..., R[N/2-1], I[N/2-1], R[N/2], 0]`,
/// `N + 2` `i16` values.
#[derive(Debug, Clone, Copy)]
pub struct RealFft {
    order: u32,
}

impl RealFft {
    /// Creates a transform of the given order. `order` must be `> 1` and
    /// `<= 10`; orders of 0 or 1 describe degenerate transforms the core
    /// never constructs.
    pub fn new(order: u32) -> Result<Self, OrderError> {
        if order <= 1 || order > MAX_FFT_ORDER {
            return Err(OrderError { order });
        }
        Ok(Self { order })
    }

    /// Transform length `N = 2^order`.
    pub fn n(&self) -> usize {
        1 << self.order
    }

    /// Packed spectrum length, `N + 2`.
    pub fn spectrum_len(&self) -> usize {
        self.n() + 2
    }

    /// Forward transform. `time` must have length `N`; `spectrum` must have
    /// length `N + 2`. Returns the scale exponent (always `0`: the forward
    /// path uses a fixed internal shift, unlike the inverse).
    pub fn forward(&self, time: &[i16], spectrum: &mut [i16]) -> i32 {
        debug_assert_eq!(time.len(), self.n());
        debug_assert_eq!(spectrum.len(), self.spectrum_len());

        let n = self.n();
        let mut buf = [0i16; 2 * MAX_N];
        let complex = &mut buf[..2 * n];
        for (i, &sample) in time.iter().enumerate() {
            complex[2 * i] = sample;
            complex[2 * i + 1] = 0;
        }

        complex_fft::bit_reverse(complex, self.order);
        let result = complex_fft::forward(complex, self.order);
        spectrum.copy_from_slice(&complex[..n + 2]);
        result
    }

    /// Inverse transform. `spectrum` must have length `N + 2`; `time` must
    /// have length `N`. Returns the scale exponent: the caller must
    /// left-shift `time` by this amount to recover the physical signal.
    pub fn inverse(&self, spectrum: &[i16], time: &mut [i16]) -> i32 {
        debug_assert_eq!(spectrum.len(), self.spectrum_len());
        debug_assert_eq!(time.len(), self.n());

        let n = self.n();
        let mut buf = [0i16; 2 * MAX_N];
        let complex = &mut buf[..2 * n];
        complex[..n + 2].copy_from_slice(spectrum);

        // Reconstruct the negative-frequency half from conjugate symmetry.
        let mut i = n + 2;
        while i < 2 * n {
            complex[i] = spectrum[2 * n - i];
            complex[i + 1] = -spectrum[2 * n - i + 1];
            i += 2;
        }

        complex_fft::bit_reverse(complex, self.order);
        let scale = complex_fft::inverse(complex, self.order);
        for (i, sample) in time.iter_mut().enumerate() {
            *sample = complex[2 * i];
        }
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_orders() {
        assert!(RealFft::new(0).is_err());
        assert!(RealFft::new(1).is_err());
        assert!(RealFft::new(11).is_err());
    }

    #[test]
    fn accepts_order_seven_used_by_the_core() {
        let fft = RealFft::new(7).unwrap();
        assert_eq!(fft.n(), 128);
        assert_eq!(fft.spectrum_len(), 130);
    }

    #[test]
    fn dc_forward_then_inverse_round_trips_in_magnitude() {
        let fft = RealFft::new(7).unwrap();
        let n = fft.n();
        let time = vec![4096i16; n];
        let mut spectrum = vec![0i16; fft.spectrum_len()];
        fft.forward(&time, &mut spectrum);

        // All the energy should land in the DC bin for a constant signal.
        assert!(spectrum[0].unsigned_abs() > spectrum[2].unsigned_abs());

        let mut back = vec![0i16; n];
        let scale = fft.inverse(&spectrum, &mut back);
        assert!(scale >= 0);
        for &sample in &back {
            // Constant input should reconstruct to a constant (up to the
            // returned scale and fixed-point rounding).
            assert!((sample as i32 - back[0] as i32).abs() <= 2);
        }
    }

    #[test]
    fn impulse_spectrum_is_flat() {
        let fft = RealFft::new(7).unwrap();
        let n = fft.n();
        let mut time = vec![0i16; n];
        time[0] = 16384;
        let mut spectrum = vec![0i16; fft.spectrum_len()];
        fft.forward(&time, &mut spectrum);

        for k in 0..=n / 2 {
            let re = spectrum[2 * k] as i32;
            assert!((re - 128).abs() <= 4, "bin {k} real part {re}");
        }
    }
}
