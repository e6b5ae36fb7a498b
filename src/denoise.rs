use crate::config::DenoiseConfig;
use crate::types::SampleI16;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// 振幅が 0 のときに log を取らないための下駄
const EPS: f32 = 1e-10;

/// ノイズ除去関数
///
/// 純粋関数として扱う。呼び出し間で状態を持たず、
/// 出力の長さは常に入力と同じでなければならない。
pub trait NoiseReducer: Send + Sync {
    fn reduce(&self, samples: &[SampleI16], sample_rate: u32) -> Vec<SampleI16>;
}

/// 定常スペクトルゲートによるノイズ除去
///
/// # アルゴリズム
///
/// 1. Hann 窓で STFT を計算
/// 2. 周波数ビンごとに dB 振幅の平均と標準偏差を求め、
///    `平均 + 標準偏差 × n_std_thresh` を閾値とする
/// 3. 閾値を超えたセルを 1、それ以外を 0 とするマスクを作成
/// 4. マスクを周波数方向・時間方向に平滑化
/// 5. `mask × prop_decrease + (1 - prop_decrease)` をゲインとして適用
/// 6. 逆 STFT（重み付きオーバーラップ加算）で時間波形に戻す
///
/// 統計はチャンク内だけで計算するため、チャンクごとに独立して処理される。
/// 短いチャンクでは全体を一括処理した場合より除去性能が下がる。
///
/// # Examples
///
/// ```
/// # use denoise_recorder::config::DenoiseConfig;
/// # use denoise_recorder::denoise::{NoiseReducer, SpectralGate};
/// let gate = SpectralGate::new(&DenoiseConfig::default());
/// let cleaned = gate.reduce(&vec![0i16; 1024], 16000);
/// assert_eq!(cleaned.len(), 1024);
/// ```
pub struct SpectralGate {
    n_fft: usize,
    hop_length: usize,
    n_std_thresh: f32,
    prop_decrease: f32,
    freq_mask_smooth_hz: f32,
    time_mask_smooth_ms: f32,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl SpectralGate {
    pub fn new(config: &DenoiseConfig) -> Self {
        let n_fft = config.n_fft.max(2);
        let hop_length = config.hop_length.clamp(1, n_fft);

        let window: Vec<f32> = (0..n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n_fft);
        let inverse = planner.plan_fft_inverse(n_fft);

        Self {
            n_fft,
            hop_length,
            n_std_thresh: config.n_std_thresh,
            prop_decrease: config.prop_decrease.clamp(0.0, 1.0),
            freq_mask_smooth_hz: config.freq_mask_smooth_hz.max(0.0),
            time_mask_smooth_ms: config.time_mask_smooth_ms.max(0.0),
            window,
            forward,
            inverse,
        }
    }

    /// マスクを周波数・時間方向の移動平均で平滑化
    fn smooth_mask(&self, mask: Vec<Vec<f32>>, sample_rate: u32) -> Vec<Vec<f32>> {
        let bin_hz = sample_rate as f32 / self.n_fft as f32;
        let hop_ms = self.hop_length as f32 * 1000.0 / sample_rate as f32;
        let freq_radius = (self.freq_mask_smooth_hz / bin_hz / 2.0) as usize;
        let time_radius = (self.time_mask_smooth_ms / hop_ms / 2.0) as usize;

        if freq_radius == 0 && time_radius == 0 {
            return mask;
        }

        let frames = mask.len();
        let bins = mask.first().map_or(0, Vec::len);

        (0..frames)
            .map(|t| {
                let t0 = t.saturating_sub(time_radius);
                let t1 = t.saturating_add(time_radius).min(frames - 1);
                (0..bins)
                    .map(|f| {
                        let f0 = f.saturating_sub(freq_radius);
                        let f1 = f.saturating_add(freq_radius).min(bins - 1);
                        let sum: f32 = mask[t0..=t1]
                            .iter()
                            .map(|row| row[f0..=f1].iter().sum::<f32>())
                            .sum();
                        sum / ((t1 - t0 + 1) * (f1 - f0 + 1)) as f32
                    })
                    .collect()
            })
            .collect()
    }
}

impl NoiseReducer for SpectralGate {
    fn reduce(&self, samples: &[SampleI16], sample_rate: u32) -> Vec<SampleI16> {
        if samples.is_empty() {
            return Vec::new();
        }

        let n_fft = self.n_fft;
        let hop = self.hop_length;
        let pad = n_fft / 2;
        let len = samples.len();

        // 最後のフレームが信号末尾まで届くようにフレーム数を決める
        let body = len + 2 * pad;
        let frames = if body <= n_fft {
            1
        } else {
            (body - n_fft).div_ceil(hop) + 1
        };
        let padded_len = (frames - 1) * hop + n_fft;

        let mut padded = vec![0.0f32; padded_len];
        for (dst, &s) in padded[pad..pad + len].iter_mut().zip(samples) {
            *dst = s as f32 / 32768.0;
        }

        // STFT
        let n_bins = n_fft / 2 + 1;
        let spectra: Vec<Vec<Complex<f32>>> = (0..frames)
            .map(|frame| {
                let start = frame * hop;
                let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                    .iter()
                    .zip(&self.window)
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                self.forward.process(&mut buffer);
                buffer
            })
            .collect();

        let db: Vec<Vec<f32>> = spectra
            .iter()
            .map(|spectrum| {
                spectrum[..n_bins]
                    .iter()
                    .map(|c| 20.0 * (c.norm() + EPS).log10())
                    .collect()
            })
            .collect();

        // ビンごとの閾値
        let thresholds: Vec<f32> = (0..n_bins)
            .map(|bin| {
                let mean = db.iter().map(|row| row[bin]).sum::<f32>() / frames as f32;
                let variance =
                    db.iter().map(|row| (row[bin] - mean).powi(2)).sum::<f32>() / frames as f32;
                mean + variance.sqrt() * self.n_std_thresh
            })
            .collect();

        let mask: Vec<Vec<f32>> = db
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&thresholds)
                    .map(|(&d, &t)| if d > t { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        let mask = self.smooth_mask(mask, sample_rate);

        // ゲイン適用 + 逆 STFT
        let mut output = vec![0.0f32; padded_len];
        let mut window_sum = vec![0.0f32; padded_len];
        let scale = 1.0 / n_fft as f32;

        for (frame, (mut spectrum, gains)) in spectra.into_iter().zip(&mask).enumerate() {
            for (bin, &m) in gains.iter().enumerate() {
                let gain = m * self.prop_decrease + (1.0 - self.prop_decrease);
                spectrum[bin] *= gain;
                let mirror = n_fft - bin;
                if bin > 0 && mirror != bin {
                    spectrum[mirror] *= gain;
                }
            }

            self.inverse.process(&mut spectrum);

            let start = frame * hop;
            for (i, (c, &w)) in spectrum.iter().zip(&self.window).enumerate() {
                output[start + i] += c.re * scale * w;
                window_sum[start + i] += w * w;
            }
        }

        output[pad..pad + len]
            .iter()
            .zip(&window_sum[pad..pad + len])
            .map(|(&y, &ws)| {
                let y = if ws > 1e-8 { y / ws } else { y };
                (y * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
            })
            .collect()
    }
}
