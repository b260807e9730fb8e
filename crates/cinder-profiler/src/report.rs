use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::{ProfilerConfig, ProfilerError};

const NAME_MAX_WIDTH: usize = 55;
const SHAPES_MAX_WIDTH: usize = 80;
const COLUMN_WIDTH: usize = 12;
const SPACING: &str = "  ";

/// One closed profiling scope.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileEvent {
    pub name: String,
    pub input_shapes: Vec<Vec<usize>>,
    /// Offset from the start of the session.
    pub start: Duration,
    /// Number of scopes that were open around this one.
    pub depth: usize,
    pub cpu_time: Duration,
    pub self_cpu_time: Duration,
    /// Net bytes allocated while the scope was open, children included.
    pub cpu_memory: i64,
    pub self_cpu_memory: i64,
}

/// Everything recorded by a finished session.
#[derive(Clone, Debug)]
pub struct ProfileReport {
    events: Vec<ProfileEvent>,
    config: ProfilerConfig,
    wall_time: Duration,
}

impl ProfileReport {
    pub(crate) fn new(events: Vec<ProfileEvent>, config: ProfilerConfig, wall_time: Duration) -> Self {
        Self {
            events,
            config,
            wall_time,
        }
    }

    pub fn events(&self) -> &[ProfileEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn config(&self) -> ProfilerConfig {
        self.config
    }

    /// Time between the start and the end of the session.
    pub fn wall_time(&self) -> Duration {
        self.wall_time
    }

    /// Aggregates events by name, and also by input shapes when
    /// `group_by_input_shape` is set.
    pub fn key_averages(&self, group_by_input_shape: bool) -> KeyAverages {
        let mut stats: Vec<FunctionStats> = Vec::new();
        let mut index: HashMap<(String, Option<Vec<Vec<usize>>>), usize> = HashMap::new();

        for event in &self.events {
            let shapes = group_by_input_shape.then(|| event.input_shapes.clone());
            let key = (event.name.clone(), shapes.clone());
            let position = *index.entry(key).or_insert_with(|| {
                stats.push(FunctionStats::new(event.name.clone(), shapes));
                stats.len() - 1
            });
            stats[position].add(event);
        }

        KeyAverages {
            stats,
            profile_memory: self.config.profile_memory,
            by_input_shape: group_by_input_shape,
        }
    }

    /// Writes the events in the Chrome trace event format (`chrome://tracing`).
    pub fn export_chrome_trace<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfilerError> {
        let trace = ChromeTrace {
            trace_events: self.events.iter().map(TraceEvent::from).collect(),
        };

        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, &trace)?;
        writer.flush()?;

        log::info!(
            "Wrote {} trace events to {}",
            self.events.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Aggregated statistics of every event sharing a key.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionStats {
    pub name: String,
    /// Only set when events were grouped by input shape.
    pub input_shapes: Option<Vec<Vec<usize>>>,
    pub count: usize,
    pub cpu_time_total: Duration,
    pub self_cpu_time_total: Duration,
    pub cpu_memory_usage: i64,
    pub self_cpu_memory_usage: i64,
}

impl FunctionStats {
    fn new(name: String, input_shapes: Option<Vec<Vec<usize>>>) -> Self {
        Self {
            name,
            input_shapes,
            count: 0,
            cpu_time_total: Duration::ZERO,
            self_cpu_time_total: Duration::ZERO,
            cpu_memory_usage: 0,
            self_cpu_memory_usage: 0,
        }
    }

    fn add(&mut self, event: &ProfileEvent) {
        self.count += 1;
        self.cpu_time_total += event.cpu_time;
        self.self_cpu_time_total += event.self_cpu_time;
        self.cpu_memory_usage += event.cpu_memory;
        self.self_cpu_memory_usage += event.self_cpu_memory;
    }

    pub fn cpu_time_avg(&self) -> Duration {
        match self.count {
            0 => Duration::ZERO,
            count => self.cpu_time_total / count as u32,
        }
    }
}

/// The column a summary table is sorted by, in decreasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortKey {
    SelfCpuMemoryUsage,
    CpuMemoryUsage,
    SelfCpuTimeTotal,
    CpuTimeTotal,
    CpuTimeAvg,
    Count,
}

impl SortKey {
    fn value(&self, stats: &FunctionStats) -> i128 {
        match self {
            SortKey::SelfCpuMemoryUsage => stats.self_cpu_memory_usage as i128,
            SortKey::CpuMemoryUsage => stats.cpu_memory_usage as i128,
            SortKey::SelfCpuTimeTotal => stats.self_cpu_time_total.as_nanos() as i128,
            SortKey::CpuTimeTotal => stats.cpu_time_total.as_nanos() as i128,
            SortKey::CpuTimeAvg => stats.cpu_time_avg().as_nanos() as i128,
            SortKey::Count => stats.count as i128,
        }
    }
}

/// Events aggregated by key, ready to be printed.
#[derive(Clone, Debug)]
pub struct KeyAverages {
    stats: Vec<FunctionStats>,
    profile_memory: bool,
    by_input_shape: bool,
}

impl KeyAverages {
    /// Aggregated rows in order of first appearance.
    pub fn stats(&self) -> &[FunctionStats] {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn self_cpu_time_total(&self) -> Duration {
        self.stats.iter().map(|stats| stats.self_cpu_time_total).sum()
    }

    /// Rows in decreasing order of `key`; ties keep their order of appearance.
    pub fn sorted(&self, key: SortKey) -> Vec<&FunctionStats> {
        let mut rows: Vec<_> = self.stats.iter().collect();
        rows.sort_by_key(|stats| std::cmp::Reverse(key.value(stats)));
        rows
    }

    /// Renders the summary table, keeping the first `row_limit` rows (0 keeps them all).
    pub fn table(&self, sort_by: SortKey, row_limit: usize) -> String {
        let mut rows = self.sorted(sort_by);
        if row_limit > 0 {
            rows.truncate(row_limit);
        }

        let name_width = rows
            .iter()
            .map(|stats| stats.name.len())
            .chain(std::iter::once("Name".len()))
            .max()
            .unwrap_or_default()
            .min(NAME_MAX_WIDTH)
            + 4;
        let shapes_width = rows
            .iter()
            .map(|stats| format_shapes(stats.input_shapes.as_deref()).len())
            .chain(std::iter::once("Input Shapes".len()))
            .max()
            .unwrap_or_default()
            .min(SHAPES_MAX_WIDTH);

        let mut headers = vec![
            "Self CPU %",
            "Self CPU",
            "CPU total %",
            "CPU total",
            "CPU time avg",
        ];
        if self.profile_memory {
            headers.extend(["CPU Mem", "Self CPU Mem"]);
        }
        headers.push("# of Calls");

        let mut separator = "-".repeat(name_width);
        for _ in &headers {
            separator.push_str(SPACING);
            separator.push_str(&"-".repeat(COLUMN_WIDTH));
        }
        if self.by_input_shape {
            separator.push_str(SPACING);
            separator.push_str(&"-".repeat(shapes_width));
        }

        let mut out = String::new();
        out.push_str(&separator);
        out.push('\n');

        let mut header = format!("{:<name_width$}", "Name");
        for title in &headers {
            header.push_str(SPACING);
            header.push_str(&format!("{title:>COLUMN_WIDTH$}"));
        }
        if self.by_input_shape {
            header.push_str(SPACING);
            header.push_str(&format!("{:<shapes_width$}", "Input Shapes"));
        }
        out.push_str(header.trim_end());
        out.push('\n');
        out.push_str(&separator);
        out.push('\n');

        let self_total = self.self_cpu_time_total();
        for stats in rows {
            let mut cells = vec![
                format_percent(stats.self_cpu_time_total, self_total),
                format_time(stats.self_cpu_time_total),
                format_percent(stats.cpu_time_total, self_total),
                format_time(stats.cpu_time_total),
                format_time(stats.cpu_time_avg()),
            ];
            if self.profile_memory {
                cells.push(format_memory(stats.cpu_memory_usage));
                cells.push(format_memory(stats.self_cpu_memory_usage));
            }
            cells.push(stats.count.to_string());

            let mut line = format!(
                "{:<name_width$}",
                truncate(&stats.name, name_width - 4)
            );
            for cell in &cells {
                line.push_str(SPACING);
                line.push_str(&format!("{cell:>COLUMN_WIDTH$}"));
            }
            if self.by_input_shape {
                let shapes = format_shapes(stats.input_shapes.as_deref());
                line.push_str(SPACING);
                line.push_str(&truncate(&shapes, shapes_width));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }

        out.push_str(&separator);
        out.push('\n');
        out.push_str(&format!(
            "Self CPU time total: {}\n",
            format_time(self_total)
        ));
        out
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn format_shapes(shapes: Option<&[Vec<usize>]>) -> String {
    match shapes {
        Some(shapes) => format!("{shapes:?}"),
        None => String::new(),
    }
}

/// Formats a duration the way the summary table shows it.
pub fn format_time(duration: Duration) -> String {
    let us = duration.as_secs_f64() * 1e6;
    if us >= 1e6 {
        format!("{:.3}s", us / 1e6)
    } else if us >= 1e3 {
        format!("{:.3}ms", us / 1e3)
    } else {
        format!("{us:.3}us")
    }
}

/// Formats a signed byte count using binary units.
pub fn format_memory(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * KB;
    const GB: f64 = 1024.0 * MB;

    let value = bytes as f64;
    if value.abs() >= GB {
        format!("{:.2} Gb", value / GB)
    } else if value.abs() >= MB {
        format!("{:.2} Mb", value / MB)
    } else if value.abs() >= KB {
        format!("{:.2} Kb", value / KB)
    } else {
        format!("{bytes} b")
    }
}

fn format_percent(part: Duration, total: Duration) -> String {
    if total.is_zero() {
        return "0.00%".to_string();
    }
    format!("{:.2}%", part.as_secs_f64() / total.as_secs_f64() * 100.0)
}

#[derive(Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent>,
}

#[derive(Serialize)]
struct TraceEvent {
    name: String,
    ph: &'static str,
    ts: f64,
    dur: f64,
    pid: u32,
    tid: u32,
    args: TraceArgs,
}

#[derive(Serialize)]
struct TraceArgs {
    #[serde(rename = "Input Shapes", skip_serializing_if = "Vec::is_empty")]
    input_shapes: Vec<Vec<usize>>,
    #[serde(rename = "CPU Mem")]
    cpu_memory: i64,
    #[serde(rename = "Self CPU Mem")]
    self_cpu_memory: i64,
}

impl From<&ProfileEvent> for TraceEvent {
    fn from(event: &ProfileEvent) -> Self {
        Self {
            name: event.name.clone(),
            ph: "X",
            ts: event.start.as_secs_f64() * 1e6,
            dur: event.cpu_time.as_secs_f64() * 1e6,
            pid: std::process::id(),
            tid: 0,
            args: TraceArgs {
                input_shapes: event.input_shapes.clone(),
                cpu_memory: event.cpu_memory,
                self_cpu_memory: event.self_cpu_memory,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn event(name: &str, shapes: Vec<Vec<usize>>, self_us: u64, memory: i64) -> ProfileEvent {
        ProfileEvent {
            name: name.to_string(),
            input_shapes: shapes,
            start: Duration::ZERO,
            depth: 0,
            cpu_time: Duration::from_micros(self_us),
            self_cpu_time: Duration::from_micros(self_us),
            cpu_memory: memory,
            self_cpu_memory: memory,
        }
    }

    fn report() -> ProfileReport {
        let config = ProfilerConfig::new()
            .with_profile_memory(true)
            .with_record_shapes(true);
        ProfileReport::new(
            vec![
                event("conv2d", vec![vec![1, 3, 8, 8]], 300, 4096),
                event("relu", vec![vec![1, 8, 8, 8]], 100, 2048),
                event("conv2d", vec![vec![1, 8, 8, 8]], 500, 8192),
                event("add", vec![vec![1, 8, 8, 8]], 100, -1024),
            ],
            config,
            Duration::from_millis(1),
        )
    }

    #[rstest]
    #[case(Duration::from_nanos(1_500), "1.500us")]
    #[case(Duration::from_micros(2_345), "2.345ms")]
    #[case(Duration::from_millis(3_210), "3.210s")]
    fn time_uses_the_largest_unit(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_time(duration), expected);
    }

    #[rstest]
    #[case(512, "512 b")]
    #[case(-2048, "-2.00 Kb")]
    #[case(3 * 1024 * 1024, "3.00 Mb")]
    #[case(5 * 1024 * 1024 * 1024, "5.00 Gb")]
    fn memory_uses_binary_units(#[case] bytes: i64, #[case] expected: &str) {
        assert_eq!(format_memory(bytes), expected);
    }

    #[test]
    fn key_averages_group_by_name() {
        let averages = report().key_averages(false);

        let names: Vec<_> = averages.stats().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["conv2d", "relu", "add"]);

        let conv = &averages.stats()[0];
        assert_eq!(conv.count, 2);
        assert_eq!(conv.self_cpu_time_total, Duration::from_micros(800));
        assert_eq!(conv.cpu_time_avg(), Duration::from_micros(400));
        assert_eq!(conv.self_cpu_memory_usage, 12288);
        assert_eq!(conv.input_shapes, None);
    }

    #[test]
    fn key_averages_by_input_shape_split_rows() {
        let averages = report().key_averages(true);

        assert_eq!(averages.stats().len(), 4);
        assert_eq!(
            averages.stats()[0].input_shapes,
            Some(vec![vec![1, 3, 8, 8]])
        );
    }

    #[test]
    fn sorted_is_decreasing() {
        let averages = report().key_averages(false);

        let by_memory: Vec<_> = averages
            .sorted(SortKey::SelfCpuMemoryUsage)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(by_memory, vec!["conv2d", "relu", "add"]);

        let by_count = averages.sorted(SortKey::Count);
        assert_eq!(by_count[0].name, "conv2d");
    }

    #[test]
    fn table_lists_rows_and_totals() {
        let table = report().key_averages(false).table(SortKey::SelfCpuMemoryUsage, 2);

        assert!(table.contains("Self CPU Mem"));
        assert!(table.contains("conv2d"));
        assert!(table.contains("relu"));
        assert!(!table.contains("add  "));
        assert!(table.contains("80.00%"));
        assert!(table.contains("12.00 Kb"));
        assert!(table.ends_with("Self CPU time total: 1.000ms\n"));
    }

    #[test]
    fn name_column_is_left_aligned() {
        let table = report().key_averages(false).table(SortKey::Count, 0);
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[1].starts_with("Name "));
        assert!(lines[3].starts_with("conv2d "));
    }

    #[test]
    fn table_hides_memory_columns_when_not_profiled() {
        let report = ProfileReport::new(
            vec![event("linear", Vec::new(), 10, 0)],
            ProfilerConfig::new(),
            Duration::ZERO,
        );

        let table = report.key_averages(false).table(SortKey::CpuTimeTotal, 0);

        assert!(!table.contains("CPU Mem"));
        assert!(table.contains("linear"));
    }

    #[test]
    fn table_shows_shapes_when_grouped_by_them() {
        let table = report()
            .key_averages(true)
            .table(SortKey::SelfCpuTimeTotal, 0);

        assert!(table.contains("Input Shapes"));
        assert!(table.contains("[[1, 3, 8, 8]]"));
    }

    #[test]
    fn sort_key_parses_from_snake_case() {
        assert_eq!(
            "self_cpu_memory_usage".parse::<SortKey>().unwrap(),
            SortKey::SelfCpuMemoryUsage
        );
        assert!("cuda_time_total".parse::<SortKey>().is_err());
    }

    #[test]
    fn chrome_trace_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");

        report().export_chrome_trace(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let events = value["traceEvents"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["name"], "conv2d");
        assert_eq!(events[0]["ph"], "X");
        assert_eq!(events[0]["args"]["Self CPU Mem"], 4096);
    }
}
