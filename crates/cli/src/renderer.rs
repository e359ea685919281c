use std::io::{self, Write};

use stackreplay_core::{FrameClose, FrameVisitor, ParsedNode, ProfileModel};
use stackreplay_protocol::ProfileFormat;

fn display_name(node: &ParsedNode) -> &str {
    if node.function_name().is_empty() {
        "(anonymous)"
    } else {
        node.function_name()
    }
}

fn format_name(format: ProfileFormat) -> &'static str {
    match format {
        ProfileFormat::Legacy => "legacy (head tree, timestamps)",
        ProfileFormat::Current => "current (flat nodes, timeDeltas)",
    }
}

pub fn write_info<W: Write>(out: &mut W, label: &str, model: &ProfileModel) -> io::Result<()> {
    writeln!(out, "profile:     {label}")?;
    writeln!(out, "format:      {}", format_name(model.format()))?;
    writeln!(out, "nodes:       {}", model.nodes().len())?;
    writeln!(out, "max depth:   {}", model.max_depth())?;
    writeln!(out, "samples:     {}", model.samples().len())?;
    writeln!(out, "hit count:   {}", model.total_hit_count())?;
    writeln!(
        out,
        "time:        {:.3}ms .. {:.3}ms ({:.3}ms)",
        model.start_time(),
        model.end_time(),
        model.duration()
    )?;
    let meta = [
        ("program", model.program_node()),
        ("idle", model.idle_node()),
        ("gc", model.gc_node()),
    ];
    let present: Vec<&str> = meta
        .iter()
        .filter(|(_, node)| node.is_some())
        .map(|(name, _)| *name)
        .collect();
    let present = if present.is_empty() {
        "none".to_string()
    } else {
        present.join(", ")
    };
    writeln!(out, "meta nodes:  {present}")
}

/// Indented call tree, children in source order.
pub fn write_tree<W: Write>(
    out: &mut W,
    model: &ProfileModel,
    max_depth: Option<u32>,
) -> io::Result<()> {
    let mut pending = vec![model.root()];
    while let Some(node) = pending.pop() {
        writeln!(
            out,
            "{:indent$}{} self={:.3}ms total={:.3}ms",
            "",
            display_name(node),
            node.self_time,
            node.total_time,
            indent = node.depth as usize * 2
        )?;
        if max_depth.is_some_and(|limit| node.depth >= limit) {
            continue;
        }
        let children: Vec<&ParsedNode> = model.children(node).collect();
        pending.extend(children.into_iter().rev());
    }
    Ok(())
}

/// Writes one line per traversal event. The first write error stops
/// further output and is reported by [`EventWriter::finish`].
pub struct EventWriter<W> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if self.error.is_none()
            && let Err(err) = self.out.write_fmt(args).and_then(|()| self.out.write_all(b"\n"))
        {
            self.error = Some(err);
        }
    }

    pub fn finish(mut self) -> io::Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => self.out.flush(),
        }
    }
}

impl<W: Write> FrameVisitor for EventWriter<W> {
    fn open(&mut self, depth: u32, node: &ParsedNode, timestamp: f64) {
        self.line(format_args!(
            "{timestamp:>12.3} open  {:indent$}{}",
            "",
            display_name(node),
            indent = depth as usize * 2
        ));
    }

    fn close(&mut self, frame: FrameClose<'_>) {
        self.line(format_args!(
            "{:>12.3} close {:indent$}{} total={:.3}ms self={:.3}ms",
            frame.start + frame.total,
            "",
            display_name(frame.node),
            frame.total,
            frame.self_time,
            indent = frame.depth as usize * 2
        ));
    }
}
