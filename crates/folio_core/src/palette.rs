use crate::Rgb;

/// Rendered for downloads of unknown size (white/grey in the base palette).
pub const NEUTRAL_COLOR: u8 = 7;

// Indices 0-15 are user-themed and skipped; 16-231 form a 6x6x6 cube and
// 232-255 a grey ramp, both with stable values across emulators.
const CUBE_LEVELS: [u8; 6] = [0x00, 0x5f, 0x87, 0xaf, 0xd7, 0xff];
const CUBE_START: u16 = 16;
const GREY_START: u16 = 232;

fn entry(index: u16) -> Rgb {
    if index >= GREY_START {
        let level = (8 + 10 * (index - GREY_START)) as u8;
        return Rgb::new(level, level, level);
    }
    let offset = (index - CUBE_START) as usize;
    Rgb::new(
        CUBE_LEVELS[offset / 36],
        CUBE_LEVELS[(offset / 6) % 6],
        CUBE_LEVELS[offset % 6],
    )
}

fn distance(a: Rgb, b: Rgb) -> u32 {
    let d = |x: u8, y: u8| {
        let diff = i32::from(x) - i32::from(y);
        (diff * diff) as u32
    };
    d(a.r, b.r) + d(a.g, b.g) + d(a.b, b.b)
}

/// Nearest xterm-256 color index by squared RGB distance; ties go to the lower index.
pub fn xterm_index(color: Rgb) -> u8 {
    let mut best = CUBE_START;
    let mut best_distance = u32::MAX;
    for index in CUBE_START..=255 {
        let dist = distance(color, entry(index));
        if dist < best_distance {
            best = index;
            best_distance = dist;
            if dist == 0 {
                break;
            }
        }
    }
    best as u8
}
