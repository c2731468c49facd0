use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, action: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(format!("{}{action}", " ".repeat(pad))),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (q only outside text fields)"),
        ]),
        key_line("tab", 9, "Next control"),
        key_line("shift-tab", 3, "Previous control"),
        key_line("enter", 7, "Connect / search / export, depending on focus"),
        key_line("esc", 9, "Cancel the running export, search or connect"),
        key_line("F1", 10, "Show this help"),
        Line::from(""),
        Line::from("Study list:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Navigate"),
        ]),
        key_line("space", 7, "Toggle selection"),
        key_line("a", 11, "Select all / none"),
        Line::from(""),
        Line::from("Leave username and password empty for anonymous access."),
        Line::from("An empty date clears the study list."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
