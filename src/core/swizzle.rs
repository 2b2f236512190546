// This module implements the swizzle engine: parsing and validation of lane-selection
// (read swizzle) and lane-mask (write mask) notations over a TypeDescriptor, and the
// mapping from logical lanes to physical register components. Swizzles may use the
// constant selectors 0 and 1 in addition to x/y/z/w. The hardware `1` selector reads the
// float32 pattern of 1.0, so it is only accepted on float32 operands. Write masks are
// either strictly ascending letters ("xz") or positional with holes ("x_z_").
// match_input_to_output aligns a narrow computed source with the active lanes of a wider
// destination so a merge leaves the inactive lanes untouched. Float64 lanes occupy two
// physical components each (lane 0 -> xy, lane 1 -> zw). Every malformed notation is
// reported as a Format error; nothing is silently truncated.

//! Lane selection and write masks.

use super::error::{CodegenError, CodegenResult};
use super::types::{ElementKind, TypeDescriptor};
use std::fmt;

const LANE_LETTERS: [char; 4] = ['x', 'y', 'z', 'w'];

/// One entry of a read swizzle, expressed over logical lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Lane(u8),
    Zero,
    One,
}

impl Selector {
    fn to_char(self) -> char {
        match self {
            Selector::Lane(lane) => LANE_LETTERS[lane as usize],
            Selector::Zero => '0',
            Selector::One => '1',
        }
    }
}

/// Physical register component selector, as printed in operand suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
}

impl Component {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Component::X,
            1 => Component::Y,
            2 => Component::Z,
            _ => Component::W,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Component::X => 'x',
            Component::Y => 'y',
            Component::Z => 'z',
            Component::W => 'w',
            Component::Zero => '0',
            Component::One => '1',
        }
    }
}

/// Physical components covered by one logical lane of `kind`.
pub fn lane_components(kind: ElementKind, lane: u8) -> Vec<Component> {
    let words = kind.words_per_element() as u8;
    (0..words)
        .map(|w| Component::from_index(lane * words + w))
        .collect()
}

/// Physical components of a whole value of type `ty`, in lane order.
pub fn value_components(ty: TypeDescriptor) -> Vec<Component> {
    (0..ty.storage_words() as u8).map(Component::from_index).collect()
}

/// Read swizzle over the logical lanes of an operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Swizzle {
    selectors: Vec<Selector>,
}

impl Swizzle {
    /// Parse a dotted or bare swizzle suffix against the operand type.
    pub fn parse(text: &str, ty: TypeDescriptor) -> CodegenResult<Self> {
        let body = text.strip_prefix('.').unwrap_or(text);
        let mut selectors = Vec::with_capacity(body.len());
        for ch in body.chars() {
            let selector = match ch {
                '0' => Selector::Zero,
                '1' if ty.kind() == ElementKind::F32 => Selector::One,
                '1' => {
                    return Err(CodegenError::format(
                        "swizzle",
                        text,
                        format!("selector '1' reads float32 1.0 and is not valid for {ty}"),
                    ));
                }
                _ => {
                    let lane = LANE_LETTERS.iter().position(|&l| l == ch).ok_or_else(|| {
                        CodegenError::format("swizzle", text, format!("unknown lane letter '{ch}'"))
                    })? as u8;
                    if lane >= ty.lanes() {
                        return Err(CodegenError::format(
                            "swizzle",
                            text,
                            format!("lane '{ch}' out of range for {ty}"),
                        ));
                    }
                    Selector::Lane(lane)
                }
            };
            selectors.push(selector);
        }
        Self::from_selectors(selectors, ty.kind()).map_err(|reason| {
            CodegenError::format("swizzle", text, reason)
        })
    }

    fn from_selectors(selectors: Vec<Selector>, kind: ElementKind) -> Result<Self, String> {
        let width = selectors.len();
        if !matches!(width, 1 | 2 | 4) {
            return Err(format!("width {width} is not 1, 2 or 4"));
        }
        if width as u32 * kind.words_per_element() > 4 {
            return Err(format!("{width} {kind} lanes exceed one register"));
        }
        Ok(Self { selectors })
    }

    /// Identity selection of the first `lanes` lanes.
    pub fn identity(lanes: u8) -> Self {
        Self {
            selectors: (0..lanes).map(Selector::Lane).collect(),
        }
    }

    pub fn width(&self) -> u8 {
        self.selectors.len() as u8
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn is_identity(&self) -> bool {
        self.selectors
            .iter()
            .enumerate()
            .all(|(i, s)| *s == Selector::Lane(i as u8))
    }

    /// Result type of reading an operand of type `ty` through this swizzle.
    pub fn result_type(&self, ty: TypeDescriptor) -> CodegenResult<TypeDescriptor> {
        ty.with_lanes(self.width())
    }

    /// Expand to physical components for an operand of element kind `kind`.
    pub fn physical(&self, kind: ElementKind) -> Vec<Component> {
        let words = kind.words_per_element() as usize;
        let mut out = Vec::with_capacity(self.selectors.len() * words);
        for selector in &self.selectors {
            match selector {
                Selector::Lane(lane) => out.extend(lane_components(kind, *lane)),
                Selector::Zero => out.extend(std::iter::repeat(Component::Zero).take(words)),
                Selector::One => out.extend(std::iter::repeat(Component::One).take(words)),
            }
        }
        out
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for selector in &self.selectors {
            write!(f, "{}", selector.to_char())?;
        }
        Ok(())
    }
}

/// Write mask over the logical lanes of a destination.
///
/// Active lanes are strictly ascending; holes leave the destination lane
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteMask {
    bits: u8,
    dest_lanes: u8,
}

impl WriteMask {
    /// Parse either ascending letters (`xz`) or the positional form (`x_z_`).
    pub fn parse(text: &str, ty: TypeDescriptor) -> CodegenResult<Self> {
        let body = text.strip_prefix('.').unwrap_or(text);
        let err = |reason: String| CodegenError::format("write mask", text, reason);
        let mut bits = 0u8;

        if body.contains('_') {
            if body.len() > ty.lanes() as usize {
                return Err(err(format!("{} positions exceed {ty}", body.len())));
            }
            for (pos, ch) in body.chars().enumerate() {
                if ch == '_' {
                    continue;
                }
                match LANE_LETTERS.iter().position(|&l| l == ch) {
                    Some(lane) if lane == pos => bits |= 1 << lane,
                    Some(_) => return Err(err(format!("lane '{ch}' at position {pos}"))),
                    None => return Err(err(format!("unknown lane letter '{ch}'"))),
                }
            }
        } else {
            let mut last: Option<usize> = None;
            for ch in body.chars() {
                let lane = LANE_LETTERS
                    .iter()
                    .position(|&l| l == ch)
                    .ok_or_else(|| err(format!("unknown lane letter '{ch}'")))?;
                if lane >= ty.lanes() as usize {
                    return Err(err(format!("lane '{ch}' out of range for {ty}")));
                }
                if last.is_some_and(|prev| lane <= prev) {
                    return Err(err("lanes must be strictly ascending".to_string()));
                }
                last = Some(lane);
                bits |= 1 << lane;
            }
        }

        if bits == 0 {
            return Err(err("no active lanes".to_string()));
        }
        Ok(Self {
            bits,
            dest_lanes: ty.lanes(),
        })
    }

    /// Mask selecting every lane of `ty`.
    pub fn full(ty: TypeDescriptor) -> Self {
        Self {
            bits: (1u8 << ty.lanes()) - 1,
            dest_lanes: ty.lanes(),
        }
    }

    pub fn dest_lanes(&self) -> u8 {
        self.dest_lanes
    }

    pub fn contains(&self, lane: u8) -> bool {
        self.bits & (1 << lane) != 0
    }

    pub fn active_lanes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.dest_lanes).filter(move |&lane| self.contains(lane))
    }

    pub fn count(&self) -> u8 {
        self.bits.count_ones() as u8
    }

    /// Whether the active lanes form a prefix (`x`, `xy`, `xyzw`).
    pub fn is_prefix(&self) -> bool {
        self.bits == (1u8 << self.count()) - 1
    }

    /// Physical destination slots for a destination of element kind `kind`:
    /// `Some(component)` where written, `None` for holes. Trailing holes are
    /// dropped.
    pub fn physical(&self, kind: ElementKind) -> Vec<Option<Component>> {
        let mut out = Vec::new();
        for lane in 0..self.dest_lanes {
            for component in lane_components(kind, lane) {
                out.push(self.contains(lane).then_some(component));
            }
        }
        while out.last() == Some(&None) {
            out.pop();
        }
        out
    }
}

impl fmt::Display for WriteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_prefix() {
            for lane in self.active_lanes() {
                write!(f, "{}", LANE_LETTERS[lane as usize])?;
            }
        } else {
            for lane in 0..self.dest_lanes {
                let ch = if self.contains(lane) {
                    LANE_LETTERS[lane as usize]
                } else {
                    '_'
                };
                write!(f, "{ch}")?;
            }
        }
        Ok(())
    }
}

/// Align `src` with the active lanes of `dest`.
///
/// The result has one selector per destination lane: the k-th active lane
/// reads `src[k]`, inactive lanes read the zero constant.
pub fn match_input_to_output(dest: &WriteMask, src: &Swizzle) -> CodegenResult<Swizzle> {
    if src.width() != dest.count() {
        return Err(CodegenError::format(
            "swizzle",
            &src.to_string(),
            format!(
                "width {} does not match {} active lanes of mask '{dest}'",
                src.width(),
                dest.count()
            ),
        ));
    }
    let mut active = src.selectors().iter();
    let selectors = (0..dest.dest_lanes())
        .map(|lane| match dest.contains(lane) {
            true => active.next().copied().unwrap_or(Selector::Zero),
            false => Selector::Zero,
        })
        .collect();
    Ok(Swizzle { selectors })
}
