use std::fmt::Display;
use std::ops::Range;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use once_cell::sync::OnceCell;
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use crate::drivers::envelope::EnvelopeResult;
use crate::drivers::error::StethoscopeError;
use crate::drivers::fft::SpectrumResult;
use crate::drivers::wavelet::WaveletResult;
use crate::drivers::SignalRecord;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 400,
            background: RGBColor(10, 10, 10),
            palette: vec![RED, GREEN, BLUE, MAGENTA, CYAN, YELLOW, WHITE],
        }
    }
}
// 内嵌字体：无头设备上没有 fontconfig
const CHART_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");
static FONT_READY: OnceCell<()> = OnceCell::new();
/// Registers the embedded face as "sans-serif". Every chart label resolves to it.
fn ensure_chart_font() -> Result<(), StethoscopeError> {
    FONT_READY
        .get_or_try_init(|| {
            register_font("sans-serif", FontStyle::Normal, CHART_FONT)
                .map_err(|_| StethoscopeError::Plot("embedded chart font is not a valid TrueType face".into()))
        })
        .map(|_| ())
}
fn draw_failed<E: Display>(panel: &str) -> impl FnOnce(E) -> StethoscopeError + '_ {
    move |e| StethoscopeError::Plot(format!("{panel}: {e}"))
}
/// One line on a chart.
struct Trace<'a> {
    label: &'a str,
    points: Vec<(f64, f64)>,
}
fn bounds(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        return -1.0..1.0;
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0)..(max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}
/// Stacks one panel per group of traces, sharing nothing but the image.
fn render_panels(
    title: &str,
    panels: &[(&str, Vec<Trace<'_>>)],
    style: &PlotStyle,
) -> Result<Vec<u8>, StethoscopeError> {
    if panels.is_empty() || panels.iter().any(|(_, traces)| traces.iter().all(|t| t.points.is_empty())) {
        return Err(StethoscopeError::Plot(format!("{title}: nothing to draw")));
    }
    ensure_chart_font()?;
    let height = style.height * panels.len() as u32;
    let mut pixels = vec![0u8; (style.width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (style.width, height)).into_drawing_area();
        root.fill(&style.background).map_err(draw_failed(title))?;
        let areas = root.split_evenly((panels.len(), 1));
        let mut colour = 0usize;
        for (area, (caption, traces)) in areas.iter().zip(panels) {
            let x_range = bounds(traces.iter().flat_map(|t| t.points.iter().map(|p| p.0)));
            let y_range = bounds(traces.iter().flat_map(|t| t.points.iter().map(|p| p.1)));
            let mut chart = ChartBuilder::on(area)
                .margin(10)
                .caption(*caption, ("sans-serif", 20).into_font().color(&WHITE))
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .build_cartesian_2d(x_range, y_range)
                .map_err(draw_failed(caption))?;
            chart
                .configure_mesh()
                .light_line_style(&WHITE.mix(0.1))
                .draw()
                .map_err(draw_failed(caption))?;
            for trace in traces {
                let color = style.palette[colour % style.palette.len()];
                colour += 1;
                chart
                    .draw_series(LineSeries::new(trace.points.iter().copied(), &color))
                    .map_err(draw_failed(trace.label))?
                    .label(trace.label)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
            }
            chart
                .configure_series_labels()
                .border_style(&WHITE.mix(0.2))
                .background_style(&style.background)
                .draw()
                .map_err(draw_failed(caption))?;
        }
        root.present().map_err(draw_failed(title))?;
    }
    encode_png(&pixels, style.width, height)
}
pub fn render_waveform_png(record: &SignalRecord, style: &PlotStyle) -> Result<Vec<u8>, StethoscopeError> {
    let points = record.samples.iter().map(|s| (s.timestamp, s.voltage)).collect();
    render_panels(
        "waveform",
        &[(record.source_id.as_str(), vec![Trace { label: "voltage (V)", points }])],
        style,
    )
}
/// Spectrum up to `max_hz` (the whole one-sided range when `None`).
pub fn render_spectrum_png(
    spectrum: &SpectrumResult,
    max_hz: Option<f64>,
    style: &PlotStyle,
) -> Result<Vec<u8>, StethoscopeError> {
    let limit = max_hz.unwrap_or(f64::INFINITY);
    let points = spectrum
        .frequencies_hz
        .iter()
        .copied()
        .zip(spectrum.magnitudes.iter().copied())
        .filter(|(f, _)| *f <= limit)
        .collect();
    render_panels(
        "spectrum",
        &[("FFT magnitude (Vp)", vec![Trace { label: "magnitude", points }])],
        style,
    )
}
pub fn render_wavelet_png(
    record: &SignalRecord,
    result: &WaveletResult,
    style: &PlotStyle,
) -> Result<Vec<u8>, StethoscopeError> {
    let times = record.times();
    let pair = |values: &[f64]| times.iter().copied().zip(values.iter().copied()).collect::<Vec<_>>();
    let approx_caption = format!("approximation ({})", result.wavelet_name);
    let detail_caption = format!("detail ({})", result.wavelet_name);
    render_panels(
        "wavelet",
        &[
            (
                approx_caption.as_str(),
                vec![Trace { label: "low frequency", points: pair(&result.approximation) }],
            ),
            (
                detail_caption.as_str(),
                vec![Trace { label: "high frequency", points: pair(&result.detail) }],
            ),
        ],
        style,
    )
}
pub fn render_envelope_png(
    record: &SignalRecord,
    result: &EnvelopeResult,
    style: &PlotStyle,
) -> Result<Vec<u8>, StethoscopeError> {
    let times = record.times();
    let pair = |values: &[f64]| times.iter().copied().zip(values.iter().copied()).collect::<Vec<_>>();
    render_panels(
        "envelope",
        &[
            (
                "signal and amplitude envelope",
                vec![
                    Trace { label: "signal", points: pair(&record.voltages()) },
                    Trace { label: "envelope", points: pair(&result.amplitude_envelope) },
                ],
            ),
            (
                "instantaneous phase (rad)",
                vec![Trace { label: "phase", points: pair(&result.instantaneous_phase) }],
            ),
            (
                "instantaneous frequency (Hz)",
                // zip stops at N-1: frequency i sits at t[i]
                vec![Trace { label: "frequency", points: pair(&result.instantaneous_frequency) }],
            ),
        ],
        style,
    )
}
/// Packs the RGB framebuffer straight into PNG bytes.
fn encode_png(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>, StethoscopeError> {
    let mut png = Vec::with_capacity(pixels.len() / 8);
    PngEncoder::new(&mut png)
        .write_image(pixels, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| StethoscopeError::Plot(format!("png encoding of {width}x{height} frame: {e}")))?;
    Ok(png)
}
