use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use folio_core::{LinearGradient, NEUTRAL_COLOR};
use folio_engine::{progress_color, render_cell, Lane, ProgressHandle, UNTRACKED_LANE};
use pretty_assertions::assert_eq;

#[derive(Clone, Default)]
struct Screen {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Screen {
    fn text(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Screen {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Broken;

impl Write for Broken {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn cell_addresses_lane_column() {
    assert_eq!(render_cell(Lane(3), 46), "\x1b[3G\x1b[48;5;46m \x1b[0m");
}

#[test]
fn colors_follow_completion() {
    let gradient = LinearGradient::traffic_light();
    assert_eq!(progress_color(&gradient, 10, None), NEUTRAL_COLOR);
    assert_eq!(progress_color(&gradient, 10, Some(0)), NEUTRAL_COLOR);
    assert_eq!(progress_color(&gradient, 0, Some(100)), 124);
    assert_eq!(progress_color(&gradient, 50, Some(100)), 226);
    assert_eq!(progress_color(&gradient, 100, Some(100)), 34);
    // Overshoot clamps to done.
    assert_eq!(progress_color(&gradient, 250, Some(100)), 34);
}

#[tokio::test]
async fn lanes_are_handed_out_in_order() {
    let screen = Screen::default();
    let progress = ProgressHandle::spawn(screen.clone(), LinearGradient::traffic_light());

    let lanes = [
        progress.allocate_lane().await,
        progress.allocate_lane().await,
        progress.allocate_lane().await,
    ];
    assert_eq!(lanes, [Lane(1), Lane(2), Lane(3)]);

    let other = progress.clone();
    assert_eq!(other.allocate_lane().await, Lane(4));
    progress.shutdown().await;
}

#[tokio::test]
async fn ticks_paint_cells_between_cursor_toggles() {
    let screen = Screen::default();
    let progress = ProgressHandle::spawn(screen.clone(), LinearGradient::traffic_light());

    let lane = progress.allocate_lane().await;
    progress.tick(lane, 0, None).await;
    progress.tick(lane, 100, Some(100)).await;
    progress.shutdown().await;
    progress.shutdown().await;

    let text = screen.text();
    assert!(text.starts_with("\x1b[?25l"));
    assert!(text.ends_with("\x1b[?25h"));
    assert_eq!(text.matches("\x1b[?25l").count(), 1);
    assert_eq!(text.matches("\x1b[?25h").count(), 1);

    let neutral = render_cell(lane, NEUTRAL_COLOR);
    let done = render_cell(lane, 34);
    let neutral_at = text.find(&neutral).expect("neutral cell painted");
    let done_at = text.find(&done).expect("finished cell painted");
    assert!(neutral_at < done_at);
}

#[tokio::test]
async fn closed_renderer_degrades_to_untracked() {
    let progress = ProgressHandle::spawn(Screen::default(), LinearGradient::traffic_light());
    progress.shutdown().await;

    assert_eq!(progress.allocate_lane().await, UNTRACKED_LANE);
    // Must not block or panic.
    progress.tick(UNTRACKED_LANE, 1, Some(2)).await;
    progress.tick(Lane(1), 1, Some(2)).await;
}

#[tokio::test]
async fn broken_output_keeps_accepting_ticks() {
    let progress = ProgressHandle::spawn(Broken, LinearGradient::traffic_light());
    let lane = progress.allocate_lane().await;
    assert_eq!(lane, Lane(1));
    for sofar in 0..10 {
        progress.tick(lane, sofar, Some(10)).await;
    }
    progress.shutdown().await;
}
