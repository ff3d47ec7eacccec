//! Modulation mapping and soft demapping (TS 38.211 Section 5.1)
//!
//! Square QAM constellations are built from two Gray coded PAM axes: even
//! bits select the in-phase amplitude and odd bits the quadrature one.

use common::types::{LogLikelihoodRatio, ModulationScheme};
use num_complex::Complex32;

/// Bits carried by each constellation axis
fn bits_per_axis(modulation: ModulationScheme) -> usize {
    modulation.bits_per_symbol() / 2
}

/// Scaling giving the constellation unit average power
fn normalization(modulation: ModulationScheme) -> f32 {
    let m = bits_per_axis(modulation) as i32;
    let levels = 4f32.powi(m);
    (2.0 * (levels - 1.0) / 3.0).sqrt().recip()
}

/// PAM amplitude of one axis, before normalization
///
/// `bits` holds the axis bits, the most significant first.
fn pam_amplitude(bits: &[u8]) -> f32 {
    let sign = |b: u8| 1.0 - 2.0 * b as f32;
    let m = bits.len();
    let mut amplitude = 1.0;
    for j in (1..m).rev() {
        amplitude = (1u32 << (m - j)) as f32 - sign(bits[j]) * amplitude;
    }
    sign(bits[0]) * amplitude
}

/// Map bits onto constellation points
///
/// `bits` holds one bit per byte and must fill `symbols` exactly.
pub fn modulate(symbols: &mut [Complex32], bits: &[u8], modulation: ModulationScheme) {
    let qm = modulation.bits_per_symbol();
    assert_eq!(
        bits.len(),
        symbols.len() * qm,
        "{} bits cannot fill {} symbols of order {}",
        bits.len(),
        symbols.len(),
        qm
    );
    let scale = normalization(modulation);
    let m = bits_per_axis(modulation);
    let mut axis = [0u8; 4];

    for (symbol, group) in symbols.iter_mut().zip(bits.chunks_exact(qm)) {
        for (j, bit) in axis.iter_mut().take(m).enumerate() {
            *bit = group[2 * j];
        }
        let re = pam_amplitude(&axis[..m]);
        for (j, bit) in axis.iter_mut().take(m).enumerate() {
            *bit = group[2 * j + 1];
        }
        let im = pam_amplitude(&axis[..m]);
        *symbol = Complex32::new(re * scale, im * scale);
    }
}

/// Range of real-valued soft bits mapped onto the quantized scale
pub fn llr_range(modulation: ModulationScheme) -> f32 {
    match modulation {
        ModulationScheme::Qpsk => 24.0,
        ModulationScheme::Qam16 => 20.0,
        ModulationScheme::Qam64 => 20.0,
        ModulationScheme::Qam256 => 24.0,
    }
}

/// Quantize a real-valued soft bit into the 8-bit representation
pub fn quantize_llr(value: f32, range: f32) -> LogLikelihoodRatio {
    let clipped = value.clamp(-range, range);
    LogLikelihoodRatio::from_f32(clipped * LogLikelihoodRatio::MAX as f32 / range)
}

/// Max-log soft demapping of equalized symbols
///
/// Each symbol comes with its post-equalization noise variance. Symbols with
/// a non-positive or non-finite variance produce null soft bits.
pub fn demodulate_soft(
    llrs: &mut [LogLikelihoodRatio],
    symbols: &[Complex32],
    noise_vars: &[f32],
    modulation: ModulationScheme,
) {
    let qm = modulation.bits_per_symbol();
    assert_eq!(llrs.len(), symbols.len() * qm, "Soft bit buffer does not match the symbol count");
    assert_eq!(symbols.len(), noise_vars.len(), "One noise variance per symbol is required");

    let m = bits_per_axis(modulation);
    let scale = normalization(modulation);
    let range = llr_range(modulation);

    // Axis amplitudes indexed by their bit pattern, most significant bit first.
    let levels: Vec<f32> = (0..(1usize << m))
        .map(|pattern| {
            let bits: Vec<u8> = (0..m).map(|j| ((pattern >> (m - 1 - j)) & 1) as u8).collect();
            pam_amplitude(&bits) * scale
        })
        .collect();

    let mut axis_llrs = [0f32; 4];
    for ((group, symbol), &noise_var) in llrs.chunks_exact_mut(qm).zip(symbols).zip(noise_vars) {
        if !(noise_var > 0.0 && noise_var.is_finite()) {
            group.fill(LogLikelihoodRatio::default());
            continue;
        }
        for (offset, value) in [(0, symbol.re), (1, symbol.im)] {
            axis_soft_bits(&mut axis_llrs[..m], value, &levels, noise_var);
            for (j, llr) in axis_llrs.iter().take(m).enumerate() {
                group[2 * j + offset] = quantize_llr(*llr, range);
            }
        }
    }
}

/// Max-log soft bits of one axis
fn axis_soft_bits(output: &mut [f32], value: f32, levels: &[f32], noise_var: f32) {
    let m = output.len();
    for (j, llr) in output.iter_mut().enumerate() {
        let mut min_zero = f32::INFINITY;
        let mut min_one = f32::INFINITY;
        for (pattern, level) in levels.iter().enumerate() {
            let distance = (value - level) * (value - level);
            if (pattern >> (m - 1 - j)) & 1 == 0 {
                min_zero = min_zero.min(distance);
            } else {
                min_one = min_one.min(distance);
            }
        }
        *llr = (min_one - min_zero) / noise_var;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ModulationScheme; 4] = [
        ModulationScheme::Qpsk,
        ModulationScheme::Qam16,
        ModulationScheme::Qam64,
        ModulationScheme::Qam256,
    ];

    fn all_patterns(qm: usize) -> Vec<u8> {
        (0..(1usize << qm))
            .flat_map(|p| (0..qm).map(move |j| ((p >> (qm - 1 - j)) & 1) as u8))
            .collect()
    }

    #[test]
    fn test_qpsk_points() {
        let mut symbols = [Complex32::new(0.0, 0.0); 2];
        modulate(&mut symbols, &[0, 0, 1, 0], ModulationScheme::Qpsk);
        let a = std::f32::consts::FRAC_1_SQRT_2;
        assert!((symbols[0] - Complex32::new(a, a)).norm() < 1e-6);
        assert!((symbols[1] - Complex32::new(-a, a)).norm() < 1e-6);
    }

    #[test]
    fn test_16qam_point() {
        // 38.211: b = 0011 maps to (3 + 3j) / sqrt(10)
        let mut symbols = [Complex32::new(0.0, 0.0); 1];
        modulate(&mut symbols, &[0, 0, 1, 1], ModulationScheme::Qam16);
        let expected = Complex32::new(3.0, 3.0) / 10f32.sqrt();
        assert!((symbols[0] - expected).norm() < 1e-6);
    }

    #[test]
    fn test_unit_average_power() {
        for modulation in ALL {
            let qm = modulation.bits_per_symbol();
            let bits = all_patterns(qm);
            let mut symbols = vec![Complex32::new(0.0, 0.0); 1 << qm];
            modulate(&mut symbols, &bits, modulation);
            let power = symbols.iter().map(|s| s.norm_sqr()).sum::<f32>() / symbols.len() as f32;
            assert!((power - 1.0).abs() < 1e-4, "{:?} power {}", modulation, power);
        }
    }

    #[test]
    fn test_noiseless_demapping_recovers_bits() {
        for modulation in ALL {
            let qm = modulation.bits_per_symbol();
            let bits = all_patterns(qm);
            let mut symbols = vec![Complex32::new(0.0, 0.0); 1 << qm];
            modulate(&mut symbols, &bits, modulation);

            let noise_vars = vec![0.01; symbols.len()];
            let mut llrs = vec![LogLikelihoodRatio::default(); bits.len()];
            demodulate_soft(&mut llrs, &symbols, &noise_vars, modulation);

            for (llr, bit) in llrs.iter().zip(&bits) {
                assert_ne!(llr.value(), 0);
                assert_eq!(llr.hard_decision(), *bit);
            }
        }
    }

    #[test]
    fn test_invalid_noise_gives_null_llrs() {
        let symbols = [Complex32::new(0.7, -0.7), Complex32::new(0.0, 0.0)];
        let noise_vars = [f32::INFINITY, 0.0];
        let mut llrs = [LogLikelihoodRatio::new(5); 4];
        demodulate_soft(&mut llrs, &symbols, &noise_vars, ModulationScheme::Qpsk);
        assert!(llrs.iter().all(|l| l.value() == 0));
    }

    #[test]
    fn test_quantization_saturates() {
        assert_eq!(quantize_llr(1000.0, 24.0).value(), LogLikelihoodRatio::MAX);
        assert_eq!(quantize_llr(-12.0, 24.0).value(), -60);
    }
}
