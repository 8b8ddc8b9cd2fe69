//! Chrome Trace Event emission.
//!
//! After all work terminates the scheduler drains every timer into one
//! `traceEvents` array of complete (`ph:"X"`) events, loadable in
//! `chrome://tracing` or Perfetto. Zero-duration events are omitted; an
//! unused timer therefore leaves no trace.

use std::fs;
use std::io::BufWriter;
use std::time::Instant;

use camino::Utf8Path;
use serde::Serialize;

use crate::project::Project;
use crate::timer::Timer;

#[derive(Serialize)]
struct TraceEvent {
    name: String,
    cat: String,
    ph: &'static str,
    ts: u64,
    dur: u64,
    pid: u32,
    tid: String,
}

#[derive(Serialize)]
struct TraceFile {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent>,
}

/// Writes the run's trace to `path`, with timer starts measured against
/// `epoch`.
pub(crate) fn write_trace(
    path: &Utf8Path,
    epoch: Instant,
    projects: &[Project],
) -> std::io::Result<()> {
    let mut events = Vec::new();

    for project in projects {
        push_event(
            &mut events,
            "parser-to-pickler",
            project,
            &project.outline_timer,
            epoch,
        );
        push_event(
            &mut events,
            "pickle-export",
            project,
            &project.pickle_export_timer,
            epoch,
        );
        for (index, group) in project.groups.iter().enumerate() {
            push_event(
                &mut events,
                &format!("compile-{index}"),
                project,
                &group.timer,
                epoch,
            );
        }
        push_event(&mut events, "javac", project, &project.javac_timer, epoch);
    }

    let file = fs::File::create(path)?;
    serde_json::to_writer(
        BufWriter::new(file),
        &TraceFile {
            trace_events: events,
        },
    )?;
    Ok(())
}

fn push_event(
    events: &mut Vec<TraceEvent>,
    name: &str,
    project: &Project,
    timer: &Timer,
    epoch: Instant,
) {
    let dur = timer.duration_us() as u64;
    if dur == 0 {
        return;
    }
    let ts = timer.start_us_since(epoch).unwrap_or(0.0) as u64;
    events.push(TraceEvent {
        name: name.to_string(),
        cat: project.label.clone(),
        ph: "X",
        ts,
        dur,
        pid: 0,
        tid: timer.stopped_by().unwrap_or_else(|| "main".to_string()),
    });
}
