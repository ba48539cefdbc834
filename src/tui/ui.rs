//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem, Wrap},
    style::{Color, Style, Modifier},
};
use super::app::{DebuggerApp, MEMORY_ROW_BYTES};
use crate::MachineState;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers, status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(12),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, output, help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(6),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_output(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw disassembly view around the instruction pointer.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw non-zero registers, host order.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let machine = &app.machine;
    let rows = (area.height as usize).saturating_sub(3);

    let mut content = vec![Line::from(vec![
        Span::raw("IP: "),
        Span::styled(format!("{}", machine.regs.ip), Style::default().fg(Color::Yellow)),
        Span::raw("   Steps: "),
        Span::styled(format!("{}", machine.steps), Style::default().fg(Color::Cyan)),
        Span::raw("   State: "),
        Span::styled(format!("{:?}", machine.state), state_style(machine.state)),
    ])];

    content.extend(machine.regs.non_zero().take(rows).map(|(index, value)| {
        Line::from(vec![
            Span::raw(format!("${:<3} ", index)),
            Span::styled(format!("{:#018x}", value), Style::default().fg(Color::White)),
            Span::raw(format!(" = {}", value)),
        ])
    }));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory as a hex dump.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll;
    let end = (start + visible_rows).min(app.memory_rows());
    let ip_offset = app.ip_offset();

    let items: Vec<ListItem> = (start..end)
        .map(|row| {
            let offset = row * MEMORY_ROW_BYTES;
            let bytes = app.machine.mem.dump(offset, MEMORY_ROW_BYTES);
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let text = format!("{:06x}: {}", offset, hex.join(" "));

            let holds_ip = ip_offset
                .map(|ip| ip >= offset && ip < offset + MEMORY_ROW_BYTES)
                .unwrap_or(false);

            let style = if holds_ip {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if bytes.iter().any(|&b| b != 0) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw TRAP output.
fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let output = Paragraph::new(String::from_utf8_lossy(&app.output).into_owned())
        .wrap(Wrap { trim: false })
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(output, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}

/// Color for the machine state.
fn state_style(state: MachineState) -> Style {
    match state {
        MachineState::Running => Style::default().fg(Color::Green),
        MachineState::Halted => Style::default().fg(Color::Gray),
        MachineState::Faulted => Style::default().fg(Color::Red),
    }
}
