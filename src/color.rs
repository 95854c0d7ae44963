// src/color.rs

//! RGB colors and the named colors JES programs expect.

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Color { red, green, blue }
    }

    pub const fn to_array(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }

    pub const fn from_array(rgb: [u8; 3]) -> Self {
        Color::new(rgb[0], rgb[1], rgb[2])
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        Color::new(red, green, blue)
    }
}

/// The predefined colors of the JES environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Black,
    White,
    Blue,
    Red,
    Green,
    Gray,
    DarkGray,
    LightGray,
    Yellow,
    Orange,
    Pink,
    Magenta,
    Cyan,
}

impl NamedColor {
    pub const fn to_color(self) -> Color {
        match self {
            NamedColor::Black => Color::new(0, 0, 0),
            NamedColor::White => Color::new(255, 255, 255),
            NamedColor::Blue => Color::new(0, 0, 255),
            NamedColor::Red => Color::new(255, 0, 0),
            NamedColor::Green => Color::new(0, 255, 0),
            NamedColor::Gray => Color::new(128, 128, 128),
            NamedColor::DarkGray => Color::new(64, 64, 64),
            NamedColor::LightGray => Color::new(192, 192, 192),
            NamedColor::Yellow => Color::new(255, 255, 0),
            NamedColor::Orange => Color::new(255, 200, 0),
            NamedColor::Pink => Color::new(255, 175, 175),
            NamedColor::Magenta => Color::new(255, 0, 255),
            NamedColor::Cyan => Color::new(0, 255, 255),
        }
    }
}

impl From<NamedColor> for Color {
    fn from(named: NamedColor) -> Self {
        named.to_color()
    }
}

/// JES's `makeColor(r, g, b)`.
pub fn make_color(red: u8, green: u8, blue: u8) -> Color {
    Color::new(red, green, blue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_match_the_jes_named_colors() {
        assert_eq!(Color::from(NamedColor::Orange), make_color(255, 200, 0));
        assert_eq!(NamedColor::Pink.to_color().to_array(), [255, 175, 175]);
        assert_eq!(Color::from((64u8, 64, 64)), Color::from(NamedColor::DarkGray));
    }
}
