use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};
use crate::app::{App, InputMode};
use crate::message::{Message, Sender};
use crate::theme::Theme;

/// Bubbles take at most this share of the chat width
const BUBBLE_WIDTH_PERCENT: usize = 80;
const PENDING_CURSOR: &str = "|";

/// Split a line into spans, converting **bold** markers to styled spans
fn parse_markdown_line(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut current_text), base));
                }
                spans.push(Span::styled(bold_text, base.add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
                if found_close {
                    current_text.push_str("**");
                }
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, base));
    }

    spans
}

/// Greedy word wrap by display width. Words wider than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();

    for paragraph in text.split('\n') {
        let mut line = String::new();
        let mut line_width = 0;

        for word in paragraph.split(' ') {
            let word_width = word.width();

            let needed = if line.is_empty() { word_width } else { line_width + 1 + word_width };
            if needed <= width {
                if !line.is_empty() {
                    line.push(' ');
                    line_width += 1;
                }
                line.push_str(word);
                line_width += word_width;
                continue;
            }

            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
                line_width = 0;
            }
            for c in word.chars() {
                let char_width = c.width().unwrap_or(0);
                // A lone char wider than the line still gets a row of its own
                if line_width + char_width > width && !line.is_empty() {
                    out.push(std::mem::take(&mut line));
                    line_width = 0;
                }
                line.push(c);
                line_width += char_width;
            }
        }

        out.push(line);
    }

    out
}

fn sender_label(sender: Sender, model: &str) -> String {
    match sender {
        Sender::User => "You".to_string(),
        Sender::Assistant | Sender::Pending => model.to_string(),
        Sender::Error => "Error".to_string(),
    }
}

/// Lay out the conversation as padded, aligned bubble lines
pub fn build_chat_lines(
    messages: &[Message],
    width: usize,
    theme: &Theme,
    model: &str,
    show_cursor: bool,
) -> Vec<Line<'static>> {
    let max_bubble = (width * BUBBLE_WIDTH_PERCENT / 100).max(4);
    // One column of padding on each side
    let text_width = max_bubble - 2;
    let mut lines = Vec::new();

    for msg in messages {
        let alignment = if msg.sender == Sender::User {
            Alignment::Right
        } else {
            Alignment::Left
        };
        let bubble = theme.bubble_style(msg.sender);

        lines.push(
            Line::from(Span::styled(sender_label(msg.sender, model), theme.label_style(msg.sender)))
                .alignment(alignment),
        );

        let mut text = msg.text.clone();
        if msg.sender == Sender::Pending && show_cursor {
            text.push_str(PENDING_CURSOR);
        }
        let wrapped = wrap_text(&text, text_width);
        let inner = wrapped.iter().map(|l| l.width()).max().unwrap_or(0);

        for row in wrapped {
            let pad = inner - row.width();
            let mut spans = vec![Span::styled(" ", bubble)];
            if msg.sender == Sender::Assistant {
                spans.extend(parse_markdown_line(&row, bubble));
            } else {
                spans.push(Span::styled(row, bubble));
            }
            spans.push(Span::styled(" ".repeat(pad + 1), bubble));
            lines.push(Line::from(spans).alignment(alignment));
        }

        lines.push(Line::default());
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    frame.render_widget(
        Block::default().style(Style::default().bg(app.theme.background)),
        area,
    );

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(
            format!(" Chat with {} ", app.selected_model),
            Style::default().fg(app.theme.title).bold(),
        ),
        Span::styled(
            format!("[{}] ", if app.config.response_mode.is_stream() { "stream" } else { "single" }),
            Style::default().fg(app.theme.muted),
        ),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(app.theme.muted),
        ),
    ])
    .alignment(Alignment::Center);

    frame.render_widget(Paragraph::new(title), area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(app.theme.border))
        .style(app.theme.panel_style());

    if app.conversation.is_empty() {
        app.total_chat_lines = 0;
        app.scroll = 0;
        let empty = Paragraph::new(Text::from(Span::styled(
            "Type a message to begin...",
            Style::default().fg(app.theme.muted),
        )))
        .alignment(Alignment::Center)
        .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let lines = build_chat_lines(
        app.conversation.messages(),
        app.chat_width as usize,
        &app.theme,
        &app.selected_model,
        app.animation_frame == 0,
    );
    app.total_chat_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    app.scroll = if app.follow_bottom {
        app.max_scroll()
    } else {
        app.scroll.min(app.max_scroll())
    };

    let chat = Paragraph::new(lines)
        .block(block)
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && !app.loading;
    let border_color = if editing { app.theme.border_focus } else { app.theme.border };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .style(app.theme.panel_style())
        .title(" Message ")
        .title_alignment(Alignment::Left);

    if app.loading {
        let waiting = Paragraph::new(Span::styled(
            "Waiting for reply...",
            Style::default().fg(app.theme.muted).add_modifier(Modifier::ITALIC),
        ))
        .block(block);
        frame.render_widget(waiting, area);
        return;
    }

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    // Keep the cursor visible with horizontal scrolling
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let content = if app.input.is_empty() {
        Span::styled("Type your message...", Style::default().fg(app.theme.muted))
    } else {
        let visible_text: String = app.input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Span::styled(visible_text, Style::default().fg(app.theme.input_fg))
    };

    frame.render_widget(Paragraph::new(content).block(block), area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = match app.input_mode {
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" PgUp/PgDn ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        InputMode::Normal => vec![
            Span::styled(" i ", key_style),
            Span::styled(" type ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" M ", key_style),
            Span::styled(" model ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ],
    };

    if let Some(status) = &app.status {
        hints.push(Span::styled(format!(" {} ", status), Style::default().fg(Color::Red)));
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 40.min(area.width.saturating_sub(4));
    let popup_height = (app.available_models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if model == &app.selected_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}
