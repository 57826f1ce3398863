//! リサンプラ / PCM16エンコーダ
//!
//! キャプチャした浮動小数点サンプルを、バックエンドが要求する
//! 16kHz / 16bit / リトルエンディアン PCM に変換する。
//! すべての関数は純粋関数であり、同じ入力に対して常に同じ出力を返す。

/// バックエンドが要求するサンプリングレート (Hz)
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// 線形補間によるリサンプリング
///
/// 入力サンプルを `input_rate` から `target_rate` へ変換する。
/// 出力の各サンプルは、対応する入力位置の前後2サンプルを
/// 線形補間して求める。
///
/// # アルゴリズム
///
/// 1. 出力サンプル数を `len * target_rate / input_rate` で決定
/// 2. 出力位置 `i` に対応する入力位置 `pos = i * input_rate / target_rate` を計算
/// 3. `floor(pos)` と `floor(pos) + 1` の2サンプルを小数部で補間
///
/// 入力レートがすでに目標レートと等しい場合は変換せずそのまま返す。
///
/// # Examples
///
/// ```
/// # use caption_relay::resampler::resample_linear;
/// // レートが等しければ恒等変換
/// let input = vec![0.1, 0.2, 0.3];
/// assert_eq!(resample_linear(&input, 16000, 16000), input);
///
/// // 48kHz → 16kHz でサンプル数は1/3になる
/// let input = vec![0.0; 4096];
/// assert_eq!(resample_linear(&input, 48000, 16000).len(), 4096 / 3);
/// ```
pub fn resample_linear(input: &[f32], input_rate: u32, target_rate: u32) -> Vec<f32> {
    if input_rate == target_rate {
        return input.to_vec();
    }
    if input.is_empty() {
        return Vec::new();
    }

    let output_len = (input.len() as u64 * target_rate as u64 / input_rate as u64) as usize;
    let step = input_rate as f64 / target_rate as f64;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;

        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        output.push(a + (b - a) * frac);
    }

    output
}

/// 浮動小数点サンプルをPCM16リトルエンディアンのバイト列に変換
///
/// 各サンプルを [-1.0, 1.0] にクランプしてから16ビット符号付き整数へ
/// スケールする。範囲外の入力がラップアラウンドして符号反転することは
/// ない（1.0超は最大値、-1.0未満は最小値になる）。
///
/// 出力は `2 * samples.len()` バイト。
///
/// # Examples
///
/// ```
/// # use caption_relay::resampler::encode_pcm16le;
/// let bytes = encode_pcm16le(&[0.0, 1.0, -1.0]);
/// assert_eq!(bytes.len(), 6);
/// assert_eq!(&bytes[0..2], &[0, 0]);
/// // 1.0 → 32767 (0x7FFF)
/// assert_eq!(&bytes[2..4], &[0xFF, 0x7F]);
/// ```
pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// リサンプリングとPCM16エンコードをまとめて実行
///
/// キャプチャパイプラインがブロックごとに呼び出すエントリポイント。
pub fn resample_to_pcm16(input: &[f32], input_rate: u32) -> Vec<u8> {
    let resampled = resample_linear(input, input_rate, TARGET_SAMPLE_RATE);
    encode_pcm16le(&resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 指定周波数のサイン波を生成
    fn sine_wave(freq_hz: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq_hz * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    /// ゼロ交差数から周波数を推定
    fn estimate_frequency(samples: &[f32], sample_rate: u32) -> f32 {
        let mut crossings = 0u32;
        for pair in samples.windows(2) {
            if (pair[0] < 0.0) != (pair[1] < 0.0) {
                crossings += 1;
            }
        }
        let duration_secs = samples.len() as f32 / sample_rate as f32;
        crossings as f32 / 2.0 / duration_secs
    }

    #[test]
    fn test_identity_when_rates_equal() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let output = resample_linear(&input, 16000, 16000);
        assert_eq!(output, input);

        // 恒等変換のPCM出力は直接エンコードと一致する
        assert_eq!(resample_to_pcm16(&input, 16000), encode_pcm16le(&input));
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_linear(&[], 48000, 16000).is_empty());
        assert!(encode_pcm16le(&[]).is_empty());
    }

    #[test]
    fn test_output_length_ratio() {
        let input = vec![0.0f32; 4096];
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 1365);
        assert_eq!(resample_linear(&input, 44100, 16000).len(), 1486);
        assert_eq!(resample_linear(&input, 32000, 16000).len(), 2048);
    }

    #[test]
    fn test_sine_frequency_preserved() {
        // 440Hzのサイン波を48kHzで1秒分生成して16kHzへ変換
        let input = sine_wave(440.0, 48000, 48000);
        let output = resample_linear(&input, 48000, 16000);

        let freq = estimate_frequency(&output, 16000);
        // 線形補間の誤差を考慮して±5Hzの許容幅
        assert!(
            (freq - 440.0).abs() < 5.0,
            "推定周波数が範囲外: {} Hz",
            freq
        );
    }

    #[test]
    fn test_pcm_encoding_byte_count() {
        let samples = vec![0.5f32; 320];
        assert_eq!(encode_pcm16le(&samples).len(), 640);
    }

    #[test]
    fn test_pcm_clamps_instead_of_wrapping() {
        let bytes = encode_pcm16le(&[2.0, -2.0, 1.0, -1.0]);

        let decode = |i: usize| i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);

        // 範囲外入力は最大/最小値にクランプされ、符号反転しない
        assert_eq!(decode(0), i16::MAX);
        assert_eq!(decode(1), -i16::MAX);
        assert_eq!(decode(0), decode(2));
        assert_eq!(decode(1), decode(3));
    }

    #[test]
    fn test_pcm_roundtrip_within_quantization_error() {
        let input: Vec<f32> = (0..1000).map(|i| ((i as f32 * 0.013).sin() * 0.9)).collect();
        let bytes = encode_pcm16le(&input);

        for (i, &original) in input.iter().enumerate() {
            let value = i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
            let recovered = value as f32 / i16::MAX as f32;
            assert!(
                (recovered - original).abs() < 2.0 / 32767.0,
                "サンプル {} の量子化誤差が大きすぎる: {} vs {}",
                i,
                original,
                recovered
            );
        }
    }

    #[test]
    fn test_resample_deterministic() {
        // 純粋関数: 同じ入力は常に同じ出力
        let input = sine_wave(880.0, 44100, 4410);
        let a = resample_to_pcm16(&input, 44100);
        let b = resample_to_pcm16(&input, 44100);
        assert_eq!(a, b);
    }
}
