//! ffmpeg filter graph and argument construction.

use std::path::Path;

use reelsmith_common::config::SubtitleStyle;
use reelsmith_job_model::{OutputSpec, TrimInterval, TrimPlan};

use crate::profile::EncodeProfile;

/// Everything needed to build one ffmpeg invocation.
#[derive(Debug, Clone, Copy)]
pub struct EncodeInputs<'a> {
    pub visual: &'a Path,
    pub audio: &'a Path,
    pub plan: &'a TrimPlan,
    /// File holding the overlay text, if any.
    pub subtitle_file: Option<&'a Path>,
    pub style: &'a SubtitleStyle,
    pub output: &'a OutputSpec,
    pub profile: &'a EncodeProfile,
    pub output_path: &'a Path,
}

/// Build the full ffmpeg argument list, output path last.
///
/// Input 0 is the visual track, input 1 the audio track. Trims are applied
/// as input seeks so only the needed interval is decoded. The visual's own
/// audio is dropped.
pub fn build_ffmpeg_args(inputs: &EncodeInputs<'_>) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-loglevel",
        "error",
        "-progress",
        "pipe:1",
        "-nostats",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    push_trimmed_input(&mut args, &inputs.plan.visual, inputs.visual);
    push_trimmed_input(&mut args, &inputs.plan.audio, inputs.audio);

    args.push("-filter_complex".to_string());
    args.push(build_filter_graph(
        inputs.output,
        inputs.subtitle_file,
        inputs.style,
    ));
    args.extend(
        ["-map", "[vout]", "-map", "1:a:0"]
            .into_iter()
            .map(str::to_string),
    );
    args.extend(inputs.profile.codec_args());
    args.push("-t".to_string());
    args.push(format_secs(inputs.plan.output_duration_secs()));
    args.push(inputs.output_path.to_string_lossy().into_owned());
    args
}

fn push_trimmed_input(args: &mut Vec<String>, interval: &TrimInterval, path: &Path) {
    if interval.start_secs > 0.0 {
        args.push("-ss".to_string());
        args.push(format_secs(interval.start_secs));
    }
    args.push("-t".to_string());
    args.push(format_secs(interval.duration_secs()));
    args.push("-i".to_string());
    args.push(path.to_string_lossy().into_owned());
}

/// Video filter chain from input 0 to the `[vout]` label.
///
/// The visual is letterboxed into the output frame, resampled to the output
/// rate, and optionally gets the overlay text drawn bottom-center inside a
/// contrasting box.
pub fn build_filter_graph(
    output: &OutputSpec,
    subtitle_file: Option<&Path>,
    style: &SubtitleStyle,
) -> String {
    let (w, h) = (output.width.max(2), output.height.max(2));
    let mut graph = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p",
        fps = output.fps.max(1),
    );

    if let Some(path) = subtitle_file {
        graph.push(',');
        graph.push_str(&drawtext_filter(path, style));
    }

    graph.push_str("[vout]");
    graph
}

fn drawtext_filter(textfile: &Path, style: &SubtitleStyle) -> String {
    let mut options = vec![format!(
        "textfile={}",
        escape_filter_value(&textfile.to_string_lossy())
    )];
    // Text is drawn as-is; `%` sequences and backslashes are not interpreted.
    options.push("expansion=none".to_string());
    if let Some(font) = &style.font_file {
        options.push(format!(
            "fontfile={}",
            escape_filter_value(&font.to_string_lossy())
        ));
    }
    options.push(format!("fontsize={}", style.font_size.max(1)));
    options.push(format!("fontcolor={}", escape_filter_value(&style.font_color)));
    options.push("box=1".to_string());
    options.push(format!("boxcolor={}", escape_filter_value(&style.box_color)));
    options.push(format!("boxborderw={}", style.box_border));
    options.push("x=(w-text_w)/2".to_string());
    options.push(format!("y=h-text_h-{}", style.margin_bottom));

    escape_filter_graph(&format!("drawtext={}", options.join(":")))
}

/// Escape a single filter option value.
fn escape_filter_value(value: &str) -> String {
    escape_chars(value, &['\\', '\'', ':'])
}

/// Escape a filter description for embedding in a filter graph.
fn escape_filter_graph(filter: &str) -> String {
    escape_chars(filter, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn format_secs(secs: f64) -> String {
    format!("{:.6}", secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryPressure;
    use reelsmith_common::config::RenderConfig;
    use reelsmith_job_model::OutputFormat;
    use std::path::PathBuf;

    fn output() -> OutputSpec {
        OutputSpec {
            format: OutputFormat::Mp4H264,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }

    #[test]
    fn test_filter_graph_without_subtitle() {
        let graph = build_filter_graph(&output(), None, &SubtitleStyle::default());
        assert!(graph.starts_with("[0:v]scale=1280:720:force_original_aspect_ratio=decrease"));
        assert!(graph.contains("pad=1280:720"));
        assert!(graph.contains("fps=30"));
        assert!(graph.ends_with("format=yuv420p[vout]"));
        assert!(!graph.contains("drawtext"));
    }

    #[test]
    fn test_filter_graph_with_subtitle_uses_textfile() {
        let graph = build_filter_graph(
            &output(),
            Some(Path::new("/scratch/job/subtitle.txt")),
            &SubtitleStyle::default(),
        );
        assert!(graph.contains("drawtext=textfile=/scratch/job/subtitle.txt"));
        assert!(graph.contains("box=1"));
        assert!(graph.contains("x=(w-text_w)/2"));
        assert!(graph.contains("y=h-text_h-48"));
        assert!(graph.ends_with("[vout]"));
    }

    #[test]
    fn test_subtitle_text_is_drawn_literally() {
        let graph = build_filter_graph(
            &output(),
            Some(Path::new("/scratch/job/subtitle.txt")),
            &SubtitleStyle::default(),
        );
        assert!(graph.contains("drawtext=textfile=/scratch/job/subtitle.txt:expansion=none:"));
        assert!(!graph.contains("%"));
    }

    #[test]
    fn test_special_characters_in_paths_are_escaped() {
        let graph = build_filter_graph(
            &output(),
            Some(Path::new("/tmp/it's:here/sub.txt")),
            &SubtitleStyle::default(),
        );
        // `'` and `:` get a value-level backslash, then both the backslash
        // and the character are escaped again at graph level.
        assert!(graph.contains(r"it\\\'s\\:here"));
    }

    #[test]
    fn test_args_trim_inputs_and_map_streams() {
        let plan = TrimPlan {
            visual: TrimInterval::from_start(8.0),
            audio: TrimInterval::from_start(8.0),
            visual_source_secs: 12.0,
            audio_source_secs: 8.0,
        };
        let profile =
            EncodeProfile::resolve(OutputFormat::Mp4H264, &RenderConfig::default(), MemoryPressure::Normal);
        let out = PathBuf::from("/scratch/job/output.mp4");
        let args = build_ffmpeg_args(&EncodeInputs {
            visual: Path::new("/scratch/job/visual.mp4"),
            audio: Path::new("/scratch/job/audio.mp3"),
            plan: &plan,
            subtitle_file: None,
            style: &SubtitleStyle::default(),
            output: &output(),
            profile: &profile,
            output_path: &out,
        });

        let inputs: Vec<_> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| args[i + 1].as_str())
            .collect();
        assert_eq!(inputs, vec!["/scratch/job/visual.mp4", "/scratch/job/audio.mp3"]);
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a:0"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[vout]"));
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "8.000000"));
        assert!(!args.contains(&"-ss".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/scratch/job/output.mp4"));
    }
}
