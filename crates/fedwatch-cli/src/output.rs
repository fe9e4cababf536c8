use chrono::{DateTime, Utc};

use fedwatch_common::{
    framework_label, ClusterSnapshot, ContainerStatus, CurrentRun, FrameworkCatalog, LogKind,
    LogLine, NodeRole, UploadReport,
};
use fedwatch_session::{Notice, NoticeLevel, Phase, Renderer, SessionView};

pub fn print_cluster(snapshot: &ClusterSnapshot) {
    println!("\n=== Flower Cluster ===");
    println!(
        "  Nodes: {}/{} running   Supernodes connected: {}   SuperLink: {}",
        snapshot.running_nodes(),
        snapshot.node_count(),
        snapshot.connected_supernodes,
        non_empty(&snapshot.superlink_ip)
    );
    if let Some(fw) = snapshot.worker_framework() {
        println!("  Worker framework: {}", framework_label(fw));
    }

    println!("\n[Nodes]");
    if snapshot.nodes.is_empty() {
        println!("  (No nodes reported)");
    } else {
        println!(
            "  {:<16} {:<12} {:<16} {:<10} {:<14} {:<10}",
            "Name", "Role", "IP", "Container", "Framework", "Flower"
        );
        for node in &snapshot.nodes {
            let role = match node.role {
                NodeRole::Coordinator => "SUPERLINK",
                NodeRole::Worker => "SUPERNODE",
            };
            let container = match node.container_status {
                ContainerStatus::Running => "RUNNING",
                ContainerStatus::Stopped => "STOPPED",
                ContainerStatus::Unknown => "UNKNOWN",
            };
            println!(
                "  {:<16} {:<12} {:<16} {:<10} {:<14} {:<10}",
                node.name,
                role,
                non_empty(&node.ip),
                container,
                framework_label(non_empty(&node.framework)),
                non_empty(&node.flower_version)
            );
        }
    }

    print_run(&snapshot.current_run);
    println!();
}

fn print_run(run: &CurrentRun) {
    println!("\n[Current Run]");
    let Some(run_id) = run.run_id.as_deref() else {
        println!("  (No active run)");
        return;
    };
    println!("  Run:      {}", run_id);
    println!("  Status:   {}", run.status.as_str());
    println!(
        "  Rounds:   {}/{}",
        run.rounds_completed, run.rounds_configured
    );
    if run.duration_s > 0.0 {
        println!("  Duration: {:.1}s", run.duration_s);
    }
    if let Some(loss) = run.final_loss() {
        println!("  Loss:     {:.4}", loss);
    }
    if !run.rounds.is_empty() {
        print_rounds(run);
    }
}

fn print_rounds(run: &CurrentRun) {
    print!("{}", format_rounds(run));
}

fn format_rounds(run: &CurrentRun) -> String {
    let mut out = format!(
        "\n  {:<7} {:<10} {:<10} {:<8} {:<8}\n  {:-<47}\n",
        "Round", "Loss", "Accuracy", "Fit", "Eval", ""
    );
    for round in &run.rounds {
        out.push_str(&format!(
            "  {:<7} {:<10} {:<10} {:<8} {:<8}\n",
            round.round_num,
            fmt_metric(round.loss),
            fmt_metric(round.accuracy),
            format!("{}/{}", round.fit_clients, round.fit_clients + round.fit_failures),
            format!("{}/{}", round.eval_clients, round.eval_clients + round.eval_failures),
        ));
    }
    out
}

pub fn print_frameworks(catalog: &FrameworkCatalog) {
    println!("\n=== Frameworks ===\n");
    for fw in &catalog.frameworks {
        let marker = if catalog.cluster_framework() == Some(fw.as_str()) {
            " (workers)"
        } else {
            ""
        };
        println!("  {:<12} {}{}", fw, framework_label(fw), marker);
    }
    println!("\nStrategies: {}", catalog.strategies.join(", "));

    let defaults = catalog.run_defaults();
    println!(
        "Defaults:   rounds={} epochs={} batch={} min_clients={}",
        defaults.num_rounds, defaults.local_epochs, defaults.batch_size, defaults.min_clients
    );
    println!();
}

pub fn print_upload_report(report: &UploadReport) {
    println!(
        "\n=== Upload: {} ({}) ===\n",
        report.filename.as_deref().unwrap_or("dataset"),
        report
            .size_bytes
            .map(fmt_bytes)
            .unwrap_or_else(|| "size unknown".to_string())
    );
    if report.nodes.is_empty() {
        println!("No workers received the file.");
        return;
    }
    println!("{:<20} {:<8} {:<40}", "Node", "Result", "Message");
    println!("{:-<70}", "");
    for node in &report.nodes {
        println!(
            "{:<20} {:<8} {:<40}",
            node.label(),
            if node.success { "OK" } else { "FAILED" },
            node.message.as_deref().unwrap_or("")
        );
    }
    let failures = report.failures();
    if failures > 0 {
        println!("\n✗ {} of {} workers failed", failures, report.nodes.len());
    }
    println!();
}

fn non_empty(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.4}"))
        .unwrap_or_else(|| "-".to_string())
}

fn fmt_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

fn format_notice(notice: &Notice) -> String {
    let mark = match notice.level {
        NoticeLevel::Info => "✓",
        NoticeLevel::Warning => "!",
        NoticeLevel::Error => "✗",
    };
    format!("{mark} {}", notice.message)
}

fn format_log_line(line: &LogLine) -> String {
    match line.kind {
        LogKind::Info => format!("  | {}", line.text),
        LogKind::Error => format!("  ! {}", line.text),
        LogKind::Success => format!("  * {}", line.text),
    }
}

/// Prints what changed since the previous frame: notices, phase changes,
/// a summary line per new snapshot and new log lines.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    log_cursor: u64,
    phase: Option<Phase>,
    snapshot_at: Option<DateTime<Utc>>,
    rounds_shown: usize,
    offline: bool,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn summary(view: &SessionView<'_>) -> String {
        let mut line = format!(
            "[{}] nodes {}/{} | run: {}",
            view.phase,
            view.running_nodes(),
            view.node_count(),
            view.run_label()
        );
        if let Some((done, total)) = view.round_progress() {
            line.push_str(&format!(" | rounds {done}/{total}"));
        }
        if let Some(loss) = view.final_loss() {
            line.push_str(&format!(" | loss {loss:.4}"));
        }
        if let Some(fw) = view.cluster_framework {
            line.push_str(&format!(" | workers: {}", framework_label(fw)));
        }
        line
    }

    fn frame(&mut self, view: &SessionView<'_>) -> String {
        let mut out = String::new();
        for notice in view.notices {
            out.push_str(&format_notice(notice));
            out.push('\n');
        }

        let phase_changed = self.phase != Some(view.phase);
        let snapshot_changed = view.last_updated != self.snapshot_at;
        self.phase = Some(view.phase);
        self.snapshot_at = view.last_updated;
        if phase_changed || snapshot_changed {
            out.push_str(&Self::summary(view));
            out.push('\n');
        }

        if view.offline != self.offline {
            self.offline = view.offline;
            out.push_str(if view.offline {
                "✗ server unreachable, showing last known state\n"
            } else {
                "✓ server reachable again\n"
            });
        }

        if snapshot_changed {
            if let Some(snapshot) = view.snapshot {
                let rounds = snapshot.current_run.rounds.len();
                if rounds != self.rounds_shown {
                    self.rounds_shown = rounds;
                    if rounds > 0 {
                        out.push_str(&format_rounds(&snapshot.current_run));
                    }
                }
            }
        }

        // a cleared log restarts below the cursor, so nothing is reprinted
        for line in view.log.since(self.log_cursor) {
            out.push_str(&format_log_line(line));
            out.push('\n');
        }
        self.log_cursor = view.log.end();
        out
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, view: &SessionView<'_>) {
        print!("{}", self.frame(view));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(fmt_metric(Some(0.123456)), "0.1235");
        assert_eq!(fmt_metric(None), "-");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(non_empty(""), "N/A");
        assert_eq!(
            format_notice(&Notice::warning("Training is already running")),
            "! Training is already running"
        );
        assert_eq!(
            format_log_line(&LogLine::new("Traceback (most recent call last):")),
            "  ! Traceback (most recent call last):"
        );
    }

    #[test]
    fn test_renderer_tracks_log_cursor() {
        let mut session = fedwatch_session::ClientSession::new(10);
        let mut renderer = TerminalRenderer::new();
        renderer.render(&SessionView::new(&session));
        assert_eq!(renderer.log_cursor, 0);

        session.handle(fedwatch_session::Event::InitialStatus(
            fedwatch_common::StatusReply {
                active: true,
                ..Default::default()
            },
        ));
        let epoch = session.lifecycle().epoch();
        session.handle(fedwatch_session::Event::Stream {
            epoch,
            event: fedwatch_session::StreamEvent::Line(LogLine::new("round 1")),
        });
        renderer.render(&SessionView::new(&session));
        assert_eq!(renderer.log_cursor, 1);
        assert_eq!(renderer.phase, Some(Phase::Running));
    }

    #[test]
    fn test_summary_printed_once_per_frame() {
        let mut session = fedwatch_session::ClientSession::new(10);
        let mut renderer = TerminalRenderer::new();
        session.handle(fedwatch_session::Event::SnapshotFetched(ClusterSnapshot::default()));

        // first frame has both a new phase and a new snapshot
        let frame = renderer.frame(&SessionView::new(&session));
        assert_eq!(frame.matches("[idle]").count(), 1);

        let frame = renderer.frame(&SessionView::new(&session));
        assert!(frame.is_empty());
    }
}
