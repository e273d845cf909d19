use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::vm::GlobalStore;
use crate::vm::value::{CompositeBezier, Value, ValueKind};

/// Identifiers of every host-engine operation callable from script. The
/// numeric value is part of the compiled module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BuiltinFunction {
    // Entity lifecycle and properties.
    CreateTexture = 0,
    CreateColor = 1,
    CreateText = 2,
    CreateMovie = 3,
    CreateWindow = 4,
    CreateEffect = 5,
    CreateMask = 6,
    CreateCube = 7,
    CreateBacklog = 8,
    CreateScrollbar = 9,
    CreateChoice = 10,
    CreateName = 11,
    CreateStencil = 12,
    CreateParticle = 13,
    Delete = 14,
    SetAlias = 15,
    Request = 16,
    SetPriority = 17,
    SetShade = 18,
    SetTone = 19,
    SetBlendMode = 20,
    SetVertex = 21,

    // Timed animation.
    Fade = 30,
    Move = 31,
    Zoom = 32,
    Rotate = 33,
    Shake = 34,
    MoveCube = 35,
    BezierMove = 36,
    DrawTransition = 37,
    WaitAction = 38,
    WaitMove = 39,
    WaitFade = 40,

    // Audio.
    CreateSound = 50,
    SetVolume = 51,
    SetLoop = 52,
    SetLoopPoint = 53,
    WaitPlay = 54,
    SoundAmplitude = 55,
    SetFrequency = 56,
    SetPan = 57,

    // Dialogue and text.
    SetFont = 60,
    SetNextFocus = 61,
    WaitText = 62,
    LockText = 63,
    UnlockText = 64,
    ClearText = 65,
    SetBacklog = 66,

    // Waiting and input.
    Wait = 70,
    WaitKey = 71,
    WaitFrame = 72,
    CursorPosition = 73,
    IsSkipping = 74,

    // Save data.
    Save = 80,
    Load = 81,
    ExistSave = 82,
    DeleteSave = 83,
    SaveThumbnail = 84,

    // Queries and utility.
    Random = 90,
    Time = 91,
    Platform = 92,
    ModuleFileName = 93,
    ImageHorizon = 94,
    ImageVertical = 95,
    RemainTime = 96,
    PassageTime = 97,
    DurationTime = 98,
    StrLength = 99,
    Integer = 100,
    StringFormat = 101,
    ScrollbarValue = 102,
    Exit = 103,

    // Thread and process control (scheduled by the VM, not the host).
    CreateThread = 110,
    TerminateThread = 111,
    CreateProcess = 112,
    PauseProcess = 113,
    ResumeProcess = 114,
    TerminateProcess = 115,
}

impl BuiltinFunction {
    pub const ALL: &'static [BuiltinFunction] = &[
        BuiltinFunction::CreateTexture,
        BuiltinFunction::CreateColor,
        BuiltinFunction::CreateText,
        BuiltinFunction::CreateMovie,
        BuiltinFunction::CreateWindow,
        BuiltinFunction::CreateEffect,
        BuiltinFunction::CreateMask,
        BuiltinFunction::CreateCube,
        BuiltinFunction::CreateBacklog,
        BuiltinFunction::CreateScrollbar,
        BuiltinFunction::CreateChoice,
        BuiltinFunction::CreateName,
        BuiltinFunction::CreateStencil,
        BuiltinFunction::CreateParticle,
        BuiltinFunction::Delete,
        BuiltinFunction::SetAlias,
        BuiltinFunction::Request,
        BuiltinFunction::SetPriority,
        BuiltinFunction::SetShade,
        BuiltinFunction::SetTone,
        BuiltinFunction::SetBlendMode,
        BuiltinFunction::SetVertex,
        BuiltinFunction::Fade,
        BuiltinFunction::Move,
        BuiltinFunction::Zoom,
        BuiltinFunction::Rotate,
        BuiltinFunction::Shake,
        BuiltinFunction::MoveCube,
        BuiltinFunction::BezierMove,
        BuiltinFunction::DrawTransition,
        BuiltinFunction::WaitAction,
        BuiltinFunction::WaitMove,
        BuiltinFunction::WaitFade,
        BuiltinFunction::CreateSound,
        BuiltinFunction::SetVolume,
        BuiltinFunction::SetLoop,
        BuiltinFunction::SetLoopPoint,
        BuiltinFunction::WaitPlay,
        BuiltinFunction::SoundAmplitude,
        BuiltinFunction::SetFrequency,
        BuiltinFunction::SetPan,
        BuiltinFunction::SetFont,
        BuiltinFunction::SetNextFocus,
        BuiltinFunction::WaitText,
        BuiltinFunction::LockText,
        BuiltinFunction::UnlockText,
        BuiltinFunction::ClearText,
        BuiltinFunction::SetBacklog,
        BuiltinFunction::Wait,
        BuiltinFunction::WaitKey,
        BuiltinFunction::WaitFrame,
        BuiltinFunction::CursorPosition,
        BuiltinFunction::IsSkipping,
        BuiltinFunction::Save,
        BuiltinFunction::Load,
        BuiltinFunction::ExistSave,
        BuiltinFunction::DeleteSave,
        BuiltinFunction::SaveThumbnail,
        BuiltinFunction::Random,
        BuiltinFunction::Time,
        BuiltinFunction::Platform,
        BuiltinFunction::ModuleFileName,
        BuiltinFunction::ImageHorizon,
        BuiltinFunction::ImageVertical,
        BuiltinFunction::RemainTime,
        BuiltinFunction::PassageTime,
        BuiltinFunction::DurationTime,
        BuiltinFunction::StrLength,
        BuiltinFunction::Integer,
        BuiltinFunction::StringFormat,
        BuiltinFunction::ScrollbarValue,
        BuiltinFunction::Exit,
        BuiltinFunction::CreateThread,
        BuiltinFunction::TerminateThread,
        BuiltinFunction::CreateProcess,
        BuiltinFunction::PauseProcess,
        BuiltinFunction::ResumeProcess,
        BuiltinFunction::TerminateProcess,
    ];

    pub fn name(self) -> &'static str {
        use BuiltinFunction::*;
        match self {
            CreateTexture => "CreateTexture",
            CreateColor => "CreateColor",
            CreateText => "CreateText",
            CreateMovie => "CreateMovie",
            CreateWindow => "CreateWindow",
            CreateEffect => "CreateEffect",
            CreateMask => "CreateMask",
            CreateCube => "CreateCube",
            CreateBacklog => "CreateBacklog",
            CreateScrollbar => "CreateScrollbar",
            CreateChoice => "CreateChoice",
            CreateName => "CreateName",
            CreateStencil => "CreateStencil",
            CreateParticle => "CreateParticle",
            Delete => "Delete",
            SetAlias => "SetAlias",
            Request => "Request",
            SetPriority => "SetPriority",
            SetShade => "SetShade",
            SetTone => "SetTone",
            SetBlendMode => "SetBlendMode",
            SetVertex => "SetVertex",
            Fade => "Fade",
            Move => "Move",
            Zoom => "Zoom",
            Rotate => "Rotate",
            Shake => "Shake",
            MoveCube => "MoveCube",
            BezierMove => "BezierMove",
            DrawTransition => "DrawTransition",
            WaitAction => "WaitAction",
            WaitMove => "WaitMove",
            WaitFade => "WaitFade",
            CreateSound => "CreateSound",
            SetVolume => "SetVolume",
            SetLoop => "SetLoop",
            SetLoopPoint => "SetLoopPoint",
            WaitPlay => "WaitPlay",
            SoundAmplitude => "SoundAmplitude",
            SetFrequency => "SetFrequency",
            SetPan => "SetPan",
            SetFont => "SetFont",
            SetNextFocus => "SetNextFocus",
            WaitText => "WaitText",
            LockText => "LockText",
            UnlockText => "UnlockText",
            ClearText => "ClearText",
            SetBacklog => "SetBacklog",
            Wait => "Wait",
            WaitKey => "WaitKey",
            WaitFrame => "WaitFrame",
            CursorPosition => "CursorPosition",
            IsSkipping => "IsSkipping",
            Save => "Save",
            Load => "Load",
            ExistSave => "ExistSave",
            DeleteSave => "DeleteSave",
            SaveThumbnail => "SaveThumbnail",
            Random => "Random",
            Time => "Time",
            Platform => "Platform",
            ModuleFileName => "ModuleFileName",
            ImageHorizon => "ImageHorizon",
            ImageVertical => "ImageVertical",
            RemainTime => "RemainTime",
            PassageTime => "PassageTime",
            DurationTime => "DurationTime",
            StrLength => "StrLength",
            Integer => "Integer",
            StringFormat => "StringFormat",
            ScrollbarValue => "ScrollbarValue",
            Exit => "Exit",
            CreateThread => "CreateThread",
            TerminateThread => "TerminateThread",
            CreateProcess => "CreateProcess",
            PauseProcess => "PauseProcess",
            ResumeProcess => "ResumeProcess",
            TerminateProcess => "TerminateProcess",
        }
    }

    /// Built-ins implemented by the scheduler rather than the host engine.
    pub fn is_vm_control(self) -> bool {
        use BuiltinFunction::*;
        matches!(
            self,
            Wait | WaitKey
                | WaitFrame
                | CreateThread
                | TerminateThread
                | CreateProcess
                | PauseProcess
                | ResumeProcess
                | TerminateProcess
        )
    }
}

static BUILTIN_BY_NAME: Lazy<HashMap<String, BuiltinFunction>> = Lazy::new(|| {
    BuiltinFunction::ALL
        .iter()
        .map(|b| (b.name().to_ascii_lowercase(), *b))
        .collect()
});

/// Case-insensitive built-in lookup used by the checker.
pub fn lookup_builtin(name: &str) -> Option<BuiltinFunction> {
    BUILTIN_BY_NAME.get(&name.to_ascii_lowercase()).copied()
}

pub fn builtin_from_id(id: u16) -> Option<BuiltinFunction> {
    BuiltinFunction::ALL.iter().copied().find(|b| *b as u16 == id)
}

pub fn builtin_name(id: u16) -> Option<&'static str> {
    builtin_from_id(id).map(BuiltinFunction::name)
}

/// Named constants usable anywhere a value is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BuiltinConstant {
    // Easing functions.
    Axl1 = 0,
    Axl2 = 1,
    Axl3 = 2,
    Dxl1 = 3,
    Dxl2 = 4,
    Dxl3 = 5,
    AxlAuto = 6,
    DxlAuto = 7,
    AxlDxl = 8,
    DxlAxl = 9,
    // Screen positions.
    Center = 20,
    Left = 21,
    Right = 22,
    Top = 23,
    Bottom = 24,
    InLeft = 25,
    OutLeft = 26,
    InTop = 27,
    OutTop = 28,
    InRight = 29,
    OutRight = 30,
    InBottom = 31,
    OutBottom = 32,
    // Colors.
    White = 40,
    Black = 41,
    Red = 42,
    Green = 43,
    Blue = 44,
    // Request actions and misc.
    Inherit = 50,
    Stop = 51,
    Play = 52,
    Lock = 53,
    Unlock = 54,
    Erase = 55,
    Enter = 56,
    Leave = 57,
    Smoothing = 58,
}

impl BuiltinConstant {
    pub const ALL: &'static [BuiltinConstant] = &[
        BuiltinConstant::Axl1,
        BuiltinConstant::Axl2,
        BuiltinConstant::Axl3,
        BuiltinConstant::Dxl1,
        BuiltinConstant::Dxl2,
        BuiltinConstant::Dxl3,
        BuiltinConstant::AxlAuto,
        BuiltinConstant::DxlAuto,
        BuiltinConstant::AxlDxl,
        BuiltinConstant::DxlAxl,
        BuiltinConstant::Center,
        BuiltinConstant::Left,
        BuiltinConstant::Right,
        BuiltinConstant::Top,
        BuiltinConstant::Bottom,
        BuiltinConstant::InLeft,
        BuiltinConstant::OutLeft,
        BuiltinConstant::InTop,
        BuiltinConstant::OutTop,
        BuiltinConstant::InRight,
        BuiltinConstant::OutRight,
        BuiltinConstant::InBottom,
        BuiltinConstant::OutBottom,
        BuiltinConstant::White,
        BuiltinConstant::Black,
        BuiltinConstant::Red,
        BuiltinConstant::Green,
        BuiltinConstant::Blue,
        BuiltinConstant::Inherit,
        BuiltinConstant::Stop,
        BuiltinConstant::Play,
        BuiltinConstant::Lock,
        BuiltinConstant::Unlock,
        BuiltinConstant::Erase,
        BuiltinConstant::Enter,
        BuiltinConstant::Leave,
        BuiltinConstant::Smoothing,
    ];

    pub fn name(self) -> &'static str {
        use BuiltinConstant::*;
        match self {
            Axl1 => "Axl1",
            Axl2 => "Axl2",
            Axl3 => "Axl3",
            Dxl1 => "Dxl1",
            Dxl2 => "Dxl2",
            Dxl3 => "Dxl3",
            AxlAuto => "AxlAuto",
            DxlAuto => "DxlAuto",
            AxlDxl => "AxlDxl",
            DxlAxl => "DxlAxl",
            Center => "Center",
            Left => "Left",
            Right => "Right",
            Top => "Top",
            Bottom => "Bottom",
            InLeft => "InLeft",
            OutLeft => "OutLeft",
            InTop => "InTop",
            OutTop => "OutTop",
            InRight => "InRight",
            OutRight => "OutRight",
            InBottom => "InBottom",
            OutBottom => "OutBottom",
            White => "White",
            Black => "Black",
            Red => "Red",
            Green => "Green",
            Blue => "Blue",
            Inherit => "Inherit",
            Stop => "Stop",
            Play => "Play",
            Lock => "Lock",
            Unlock => "Unlock",
            Erase => "Erase",
            Enter => "Enter",
            Leave => "Leave",
            Smoothing => "Smoothing",
        }
    }
}

static CONSTANT_BY_NAME: Lazy<HashMap<String, BuiltinConstant>> = Lazy::new(|| {
    BuiltinConstant::ALL
        .iter()
        .map(|c| (c.name().to_ascii_lowercase(), *c))
        .collect()
});

pub fn lookup_constant(name: &str) -> Option<BuiltinConstant> {
    CONSTANT_BY_NAME.get(&name.to_ascii_lowercase()).copied()
}

pub fn constant_from_id(id: u16) -> Option<BuiltinConstant> {
    BuiltinConstant::ALL.iter().copied().find(|c| *c as u16 == id)
}

// ----- decoded argument shapes ----------------------------------------------

/// Path addressing exactly one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPath(pub String);

/// Entity selector; a trailing `*` addresses every entity under the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery(pub String);

impl EntityQuery {
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with('*')
    }
}

/// Easing applied to a timed animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EaseFunction {
    QuadIn,
    CubicIn,
    QuartIn,
    QuadOut,
    CubicOut,
    QuartOut,
    SineIn,
    SineOut,
    SineInOut,
    SineOutIn,
}

pub fn ease_from_constant(constant: BuiltinConstant) -> Option<EaseFunction> {
    use BuiltinConstant::*;
    Some(match constant {
        Axl1 => EaseFunction::QuadIn,
        Axl2 => EaseFunction::CubicIn,
        Axl3 => EaseFunction::QuartIn,
        Dxl1 => EaseFunction::QuadOut,
        Dxl2 => EaseFunction::CubicOut,
        Dxl3 => EaseFunction::QuartOut,
        AxlAuto => EaseFunction::SineIn,
        DxlAuto => EaseFunction::SineOut,
        AxlDxl => EaseFunction::SineInOut,
        DxlAxl => EaseFunction::SineOutIn,
        _ => return None,
    })
}

/// RGB color decoded from any of the accepted encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl NsColor {
    pub fn from_packed(packed: u32) -> Self {
        Self {
            r: ((packed >> 16) & 0xFF) as u8,
            g: ((packed >> 8) & 0xFF) as u8,
            b: (packed & 0xFF) as u8,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let packed = match name.to_ascii_lowercase().as_str() {
            "black" => 0x000000,
            "white" => 0xFFFFFF,
            "red" => 0xFF0000,
            "green" => 0x00FF00,
            "blue" => 0x0000FF,
            "yellow" => 0xFFFF00,
            "cyan" => 0x00FFFF,
            "magenta" => 0xFF00FF,
            "gray" | "grey" => 0x808080,
            _ => return None,
        };
        Some(Self::from_packed(packed))
    }

    pub fn parse(text: &str) -> Option<Self> {
        if let Some(hex) = text.strip_prefix('#') {
            if hex.len() == 6 {
                return u32::from_str_radix(hex, 16).ok().map(Self::from_packed);
            }
            return None;
        }
        Self::from_name(text)
    }

    pub fn from_constant(constant: BuiltinConstant) -> Option<Self> {
        use BuiltinConstant::*;
        match constant {
            White => Some(Self::from_packed(0xFFFFFF)),
            Black => Some(Self::from_packed(0x000000)),
            Red => Some(Self::from_packed(0xFF0000)),
            Green => Some(Self::from_packed(0x00FF00)),
            Blue => Some(Self::from_packed(0x0000FF)),
            _ => None,
        }
    }
}

/// Fixed-denominator rational, e.g. volume on a 0..=1000 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    pub fn thousandths(numerator: i32) -> Self {
        Self {
            numerator,
            denominator: 1000,
        }
    }

    pub fn to_f32(self) -> f32 {
        self.numerator as f32 / self.denominator as f32
    }
}

/// A built-in received an argument of the wrong kind. Fatal: it means the
/// compiler and VM disagree about the call's shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("built-in {builtin} argument {index}: expected {expected}, got {actual}")]
pub struct DispatchError {
    pub builtin: &'static str,
    /// 0-based position of the offending argument, as supplied.
    pub index: usize,
    pub expected: &'static str,
    pub actual: &'static str,
}

/// Cursor over a dispatched call's argument list. Arguments are consumed in
/// push order; every accessor converts one argument to its per-position
/// shape or fails with the argument's index and actual kind.
pub struct ArgReader<'a> {
    builtin: BuiltinFunction,
    args: &'a [Value],
    cursor: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(builtin: BuiltinFunction, args: &'a [Value]) -> Self {
        Self {
            builtin,
            args,
            cursor: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.cursor)
    }

    fn mismatch(&self, index: usize, expected: &'static str, actual: &'static str) -> DispatchError {
        DispatchError {
            builtin: self.builtin.name(),
            index,
            expected,
            actual,
        }
    }

    pub fn next_value(&mut self) -> Result<&'a Value, DispatchError> {
        let value = self
            .args
            .get(self.cursor)
            .ok_or_else(|| self.mismatch(self.cursor, "an argument", "nothing"))?;
        self.cursor += 1;
        Ok(value)
    }

    /// Peek at the final argument without consuming anything.
    pub fn last(&self) -> Option<&'a Value> {
        self.args.last()
    }

    pub fn number(&mut self) -> Result<f32, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        value
            .as_number()
            .ok_or_else(|| self.mismatch(index, "number", value.kind.kind_name()))
    }

    pub fn string(&mut self) -> Result<&'a str, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(index, "string", value.kind.kind_name()))
    }

    pub fn boolean(&mut self) -> Result<bool, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        match value.kind {
            ValueKind::Bool(b) => Ok(b),
            ValueKind::Number(n) => Ok(n != 0.0),
            _ => Err(self.mismatch(index, "bool", value.kind.kind_name())),
        }
    }

    pub fn entity_path(&mut self) -> Result<EntityPath, DispatchError> {
        Ok(EntityPath(self.string()?.to_string()))
    }

    pub fn entity_query(&mut self) -> Result<EntityQuery, DispatchError> {
        Ok(EntityQuery(self.string()?.to_string()))
    }

    /// Millisecond-scaled time span. Null means zero.
    pub fn time_span(&mut self) -> Result<Duration, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        match &value.kind {
            ValueKind::Null => Ok(Duration::ZERO),
            ValueKind::Number(ms) | ValueKind::Delta(ms) => {
                Ok(Duration::from_millis(ms.max(0.0) as u64))
            }
            other => Err(self.mismatch(index, "time span", other.kind_name())),
        }
    }

    /// Destination coordinate: an absolute number, a relative delta, or a
    /// positional constant.
    pub fn coordinate(&mut self) -> Result<&'a Value, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        match &value.kind {
            ValueKind::Number(_) | ValueKind::Delta(_) | ValueKind::BuiltinConstant(_) => Ok(value),
            other => Err(self.mismatch(index, "coordinate", other.kind_name())),
        }
    }

    pub fn color(&mut self) -> Result<NsColor, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        let color = match &value.kind {
            ValueKind::Number(packed) => Some(NsColor::from_packed(*packed as u32)),
            ValueKind::String(text) => NsColor::parse(text),
            ValueKind::BuiltinConstant(constant) => NsColor::from_constant(*constant),
            _ => None,
        };
        color.ok_or_else(|| self.mismatch(index, "color", value.kind.kind_name()))
    }

    /// Easing function id; null means linear interpolation (`None`).
    pub fn ease(&mut self) -> Result<Option<EaseFunction>, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        match &value.kind {
            ValueKind::Null => Ok(None),
            ValueKind::BuiltinConstant(constant) => ease_from_constant(*constant)
                .map(Some)
                .ok_or_else(|| self.mismatch(index, "easing constant", "builtin-constant")),
            other => Err(self.mismatch(index, "easing constant", other.kind_name())),
        }
    }

    /// Volume and similar quantities carried as thousandths.
    pub fn rational(&mut self) -> Result<Rational, DispatchError> {
        Ok(Rational::thousandths(self.number()? as i32))
    }

    /// An argument that must have been loaded from a global variable, so the
    /// built-in can write a result back through its slot.
    pub fn out_slot(&mut self) -> Result<u16, DispatchError> {
        let index = self.cursor;
        let value = self.next_value()?;
        value
            .slot
            .ok_or_else(|| self.mismatch(index, "variable reference", value.kind.kind_name()))
    }
}

// ----- engine contract ------------------------------------------------------

/// Everything the VM needs from the surrounding game engine. One override
/// point per built-in function id; the default implementation of each is a
/// safe no-op so a host can start from nothing.
#[allow(unused_variables)]
pub trait EngineCallbacks {
    // Dialogue presentation, driven by dialogue opcodes.
    fn activate_dialogue_block(&mut self, box_name: &str, block_name: &str) {}
    fn append_dialogue(&mut self, text: &str) {}
    fn dialogue_line_end(&mut self) {}
    /// Polled by the select loop once per tick per choice.
    fn is_pressed(&mut self, choice: &str) -> bool {
        false
    }

    // Entity lifecycle.
    fn create_texture(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, source: &str) {}
    fn create_color(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, width: f32, height: f32, color: NsColor) {}
    fn create_text(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, width: f32, height: f32, text: &str) {}
    fn create_movie(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, loop_play: bool, alpha: bool, source: &str) {}
    fn create_window(&mut self, path: EntityPath, priority: i32, x: f32, y: f32, width: f32, height: f32) {}
    fn create_effect(&mut self, path: EntityPath, priority: i32, x: f32, y: f32, width: f32, height: f32, effect: &str) {}
    fn create_mask(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, source: &str) {}
    fn create_cube(&mut self, path: EntityPath, priority: i32, front: &str, back: &str, right: &str, left: &str, top: &str, bottom: &str) {}
    fn create_backlog(&mut self, path: EntityPath, priority: i32) {}
    fn create_scrollbar(&mut self, path: EntityPath, priority: i32, x1: f32, y1: f32, x2: f32, y2: f32, value: f32, scrolled: EntityPath, knob: &str) {}
    fn create_choice(&mut self, path: EntityPath) {}
    fn create_name(&mut self, path: EntityPath, name: &str) {}
    fn create_stencil(&mut self, path: EntityPath, priority: i32, x: &Value, y: &Value, source: &str, inverted: bool) {}
    fn create_particle(&mut self, path: EntityPath, priority: i32, source: &str) {}
    fn delete(&mut self, query: EntityQuery) {}
    fn set_alias(&mut self, path: EntityPath, alias: EntityPath) {}
    fn request(&mut self, query: EntityQuery, action: BuiltinConstant) {}
    fn set_priority(&mut self, query: EntityQuery, priority: i32) {}
    fn set_shade(&mut self, query: EntityQuery, color: NsColor) {}
    fn set_tone(&mut self, query: EntityQuery, tone: BuiltinConstant) {}
    fn set_blend_mode(&mut self, query: EntityQuery, mode: BuiltinConstant) {}
    fn set_vertex(&mut self, query: EntityQuery, x: f32, y: f32) {}

    // Timed animation.
    fn fade(&mut self, query: EntityQuery, duration: Duration, opacity: Rational, ease: Option<EaseFunction>, wait: bool) {}
    fn do_move(&mut self, query: EntityQuery, duration: Duration, x: &Value, y: &Value, ease: Option<EaseFunction>, delay: Duration) {}
    fn zoom(&mut self, query: EntityQuery, duration: Duration, sx: Rational, sy: Rational, ease: Option<EaseFunction>, wait: bool) {}
    fn rotate(&mut self, query: EntityQuery, duration: Duration, x: &Value, y: &Value, z: &Value, ease: Option<EaseFunction>, wait: bool) {}
    fn shake(&mut self, query: EntityQuery, duration: Duration, ax: f32, ay: f32, cycles: f32, ease: Option<EaseFunction>, wait: bool) {}
    fn move_cube(&mut self, query: EntityQuery, duration: Duration, x: f32, y: f32, z: f32, ease: Option<EaseFunction>, wait: bool) {}
    fn bezier_move(&mut self, query: EntityQuery, duration: Duration, curve: &CompositeBezier, ease: Option<EaseFunction>, wait: bool) {}
    fn draw_transition(&mut self, query: EntityQuery, duration: Duration, initial: Rational, target: Rational, feather: Rational, ease: Option<EaseFunction>, rule: &str, delay: Duration) {}
    fn wait_action(&mut self, query: EntityQuery, timeout: Option<Duration>) {}
    fn wait_move(&mut self, query: EntityQuery) {}
    fn wait_fade(&mut self, query: EntityQuery) {}

    // Audio.
    fn create_sound(&mut self, path: EntityPath, kind: &str, source: &str) {}
    fn set_volume(&mut self, query: EntityQuery, duration: Duration, volume: Rational) {}
    fn set_loop(&mut self, query: EntityQuery, looping: bool) {}
    fn set_loop_point(&mut self, query: EntityQuery, start: Duration, end: Duration) {}
    fn wait_play(&mut self, query: EntityQuery) {}
    fn sound_amplitude(&mut self, kind: &str) -> f32 {
        0.0
    }
    fn set_frequency(&mut self, query: EntityQuery, duration: Duration, frequency: f32) {}
    fn set_pan(&mut self, query: EntityQuery, duration: Duration, pan: f32) {}

    // Text.
    fn set_font(&mut self, family: &str, size: f32, color: NsColor, shadow: NsColor) {}
    fn set_next_focus(&mut self, from: EntityPath, to: EntityPath, direction: BuiltinConstant) {}
    fn wait_text(&mut self) {}
    fn lock_text(&mut self, locked: bool) {}
    fn clear_text(&mut self) {}
    fn set_backlog(&mut self, enabled: bool) {}

    // Input.
    fn cursor_position(&mut self) -> (f32, f32) {
        (0.0, 0.0)
    }
    fn is_skipping(&mut self) -> bool {
        false
    }

    // Save data.
    fn save(&mut self, slot: i32) {}
    fn load(&mut self, slot: i32) {}
    fn exist_save(&mut self, slot: i32) -> bool {
        false
    }
    fn delete_save(&mut self, slot: i32) {}
    fn save_thumbnail(&mut self, slot: i32, width: f32, height: f32) {}

    // Queries.
    fn random(&mut self, max: i32) -> i32 {
        0
    }
    fn time(&mut self) -> f32 {
        0.0
    }
    fn platform(&mut self) -> i32 {
        0
    }
    fn module_file_name(&mut self) -> String {
        String::new()
    }
    fn image_horizon(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn image_vertical(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn remain_time(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn passage_time(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn duration_time(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn scrollbar_value(&mut self, path: EntityPath) -> f32 {
        0.0
    }
    fn exit(&mut self) {}
}

/// A host that ignores every callback; useful for tests and tooling.
pub struct NullEngine;

impl EngineCallbacks for NullEngine {}

// ----- dispatch -------------------------------------------------------------

/// Decode `args` for `builtin` and forward exactly one call to the engine.
/// Returns the value the built-in pushes, if it produces one. Thread and
/// process control ids never reach this function; the interpreter handles
/// them before dispatch.
pub fn dispatch(
    engine: &mut dyn EngineCallbacks,
    globals: &mut GlobalStore,
    builtin: BuiltinFunction,
    args: &[Value],
) -> Result<Option<Value>, DispatchError> {
    use BuiltinFunction::*;
    let mut reader = ArgReader::new(builtin, args);
    let result = match builtin {
        CreateTexture => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let source = reader.string()?;
            engine.create_texture(path, priority, &x, &y, source);
            None
        }
        CreateColor => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let width = reader.number()?;
            let height = reader.number()?;
            let color = reader.color()?;
            engine.create_color(path, priority, &x, &y, width, height, color);
            None
        }
        CreateText => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let width = reader.number()?;
            let height = reader.number()?;
            let text = reader.string()?;
            engine.create_text(path, priority, &x, &y, width, height, text);
            None
        }
        CreateMovie => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let loop_play = reader.boolean()?;
            let alpha = reader.boolean()?;
            let source = reader.string()?;
            engine.create_movie(path, priority, &x, &y, loop_play, alpha, source);
            None
        }
        CreateWindow => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.number()?;
            let y = reader.number()?;
            let width = reader.number()?;
            let height = reader.number()?;
            engine.create_window(path, priority, x, y, width, height);
            None
        }
        CreateEffect => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.number()?;
            let y = reader.number()?;
            let width = reader.number()?;
            let height = reader.number()?;
            let effect = reader.string()?;
            engine.create_effect(path, priority, x, y, width, height, effect);
            None
        }
        CreateMask => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let source = reader.string()?;
            engine.create_mask(path, priority, &x, &y, source);
            None
        }
        CreateCube => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let front = reader.string()?.to_string();
            let back = reader.string()?.to_string();
            let right = reader.string()?.to_string();
            let left = reader.string()?.to_string();
            let top = reader.string()?.to_string();
            let bottom = reader.string()?;
            engine.create_cube(path, priority, &front, &back, &right, &left, &top, bottom);
            None
        }
        CreateBacklog => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            engine.create_backlog(path, priority);
            None
        }
        CreateScrollbar => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x1 = reader.number()?;
            let y1 = reader.number()?;
            let x2 = reader.number()?;
            let y2 = reader.number()?;
            let value = reader.number()?;
            let scrolled = reader.entity_path()?;
            let knob = reader.string()?;
            engine.create_scrollbar(path, priority, x1, y1, x2, y2, value, scrolled, knob);
            None
        }
        CreateChoice => {
            let path = reader.entity_path()?;
            engine.create_choice(path);
            None
        }
        CreateName => {
            let path = reader.entity_path()?;
            let name = reader.string()?;
            engine.create_name(path, name);
            None
        }
        CreateStencil => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let source = reader.string()?.to_string();
            let inverted = reader.boolean()?;
            engine.create_stencil(path, priority, &x, &y, &source, inverted);
            None
        }
        CreateParticle => {
            let path = reader.entity_path()?;
            let priority = reader.number()? as i32;
            let source = reader.string()?;
            engine.create_particle(path, priority, source);
            None
        }
        Delete => {
            let query = reader.entity_query()?;
            engine.delete(query);
            None
        }
        SetAlias => {
            let path = reader.entity_path()?;
            let alias = reader.entity_path()?;
            engine.set_alias(path, alias);
            None
        }
        Request => {
            let query = reader.entity_query()?;
            let action = constant_arg(&mut reader)?;
            engine.request(query, action);
            None
        }
        SetPriority => {
            let query = reader.entity_query()?;
            let priority = reader.number()? as i32;
            engine.set_priority(query, priority);
            None
        }
        SetShade => {
            let query = reader.entity_query()?;
            let color = reader.color()?;
            engine.set_shade(query, color);
            None
        }
        SetTone => {
            let query = reader.entity_query()?;
            let tone = constant_arg(&mut reader)?;
            engine.set_tone(query, tone);
            None
        }
        SetBlendMode => {
            let query = reader.entity_query()?;
            let mode = constant_arg(&mut reader)?;
            engine.set_blend_mode(query, mode);
            None
        }
        SetVertex => {
            let query = reader.entity_query()?;
            let x = reader.number()?;
            let y = reader.number()?;
            engine.set_vertex(query, x, y);
            None
        }
        Fade => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let opacity = reader.rational()?;
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.fade(query, duration, opacity, ease, wait);
            None
        }
        Move => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            // Compatibility heuristic carried over from old compiled data:
            // when the final argument is a built-in constant, the trailing
            // (ease, delay) pair arrives swapped as (delay, ease). Decided by
            // the last argument's runtime kind. Do not "fix" this; existing
            // modules depend on it.
            let swapped = matches!(
                reader.last().map(|v| &v.kind),
                Some(ValueKind::BuiltinConstant(_))
            ) && reader.remaining() == 2;
            let (ease, delay) = if swapped {
                let delay = reader.time_span()?;
                let ease = reader.ease()?;
                (ease, delay)
            } else {
                let ease = reader.ease()?;
                let delay = reader.time_span()?;
                (ease, delay)
            };
            engine.do_move(query, duration, &x, &y, ease, delay);
            None
        }
        Zoom => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let sx = reader.rational()?;
            let sy = reader.rational()?;
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.zoom(query, duration, sx, sy, ease, wait);
            None
        }
        Rotate => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let x = reader.coordinate()?.clone();
            let y = reader.coordinate()?.clone();
            let z = reader.coordinate()?.clone();
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.rotate(query, duration, &x, &y, &z, ease, wait);
            None
        }
        Shake => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let ax = reader.number()?;
            let ay = reader.number()?;
            let cycles = reader.number()?;
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.shake(query, duration, ax, ay, cycles, ease, wait);
            None
        }
        MoveCube => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let x = reader.number()?;
            let y = reader.number()?;
            let z = reader.number()?;
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.move_cube(query, duration, x, y, z, ease, wait);
            None
        }
        BezierMove => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let index = reader.cursor;
            let value = reader.next_value()?;
            let curve = match &value.kind {
                ValueKind::Bezier(curve) => curve,
                other => {
                    return Err(DispatchError {
                        builtin: builtin.name(),
                        index,
                        expected: "bezier curve",
                        actual: other.kind_name(),
                    });
                }
            };
            let ease = reader.ease()?;
            let wait = optional_bool(&mut reader)?;
            engine.bezier_move(query, duration, curve, ease, wait);
            None
        }
        DrawTransition => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let initial = reader.rational()?;
            let target = reader.rational()?;
            let feather = reader.rational()?;
            let ease = reader.ease()?;
            let rule = reader.string()?.to_string();
            let delay = reader.time_span()?;
            engine.draw_transition(query, duration, initial, target, feather, ease, &rule, delay);
            None
        }
        WaitAction => {
            let query = reader.entity_query()?;
            let timeout = if reader.remaining() > 0 {
                Some(reader.time_span()?)
            } else {
                None
            };
            engine.wait_action(query, timeout);
            None
        }
        WaitMove => {
            let query = reader.entity_query()?;
            engine.wait_move(query);
            None
        }
        WaitFade => {
            let query = reader.entity_query()?;
            engine.wait_fade(query);
            None
        }
        CreateSound => {
            let path = reader.entity_path()?;
            let kind = reader.string()?.to_string();
            let source = reader.string()?;
            engine.create_sound(path, &kind, source);
            None
        }
        SetVolume => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let volume = reader.rational()?;
            engine.set_volume(query, duration, volume);
            None
        }
        SetLoop => {
            let query = reader.entity_query()?;
            let looping = reader.boolean()?;
            engine.set_loop(query, looping);
            None
        }
        SetLoopPoint => {
            let query = reader.entity_query()?;
            let start = reader.time_span()?;
            let end = reader.time_span()?;
            engine.set_loop_point(query, start, end);
            None
        }
        WaitPlay => {
            let query = reader.entity_query()?;
            engine.wait_play(query);
            None
        }
        SoundAmplitude => {
            let kind = reader.string()?;
            Some(Value::number(engine.sound_amplitude(kind)))
        }
        SetFrequency => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let frequency = reader.number()?;
            engine.set_frequency(query, duration, frequency);
            None
        }
        SetPan => {
            let query = reader.entity_query()?;
            let duration = reader.time_span()?;
            let pan = reader.number()?;
            engine.set_pan(query, duration, pan);
            None
        }
        SetFont => {
            let family = reader.string()?.to_string();
            let size = reader.number()?;
            let color = reader.color()?;
            let shadow = reader.color()?;
            engine.set_font(&family, size, color, shadow);
            None
        }
        SetNextFocus => {
            let from = reader.entity_path()?;
            let to = reader.entity_path()?;
            let direction = constant_arg(&mut reader)?;
            engine.set_next_focus(from, to, direction);
            None
        }
        WaitText => {
            engine.wait_text();
            None
        }
        LockText => {
            engine.lock_text(true);
            None
        }
        UnlockText => {
            engine.lock_text(false);
            None
        }
        ClearText => {
            engine.clear_text();
            None
        }
        SetBacklog => {
            let enabled = reader.boolean()?;
            engine.set_backlog(enabled);
            None
        }
        CursorPosition => {
            let x_slot = reader.out_slot()?;
            let y_slot = reader.out_slot()?;
            let (x, y) = engine.cursor_position();
            globals.set(x_slot, Value::number(x));
            globals.set(y_slot, Value::number(y));
            None
        }
        IsSkipping => Some(Value::boolean(engine.is_skipping())),
        Save => {
            let slot = reader.number()? as i32;
            engine.save(slot);
            None
        }
        Load => {
            let slot = reader.number()? as i32;
            engine.load(slot);
            None
        }
        ExistSave => {
            let slot = reader.number()? as i32;
            Some(Value::boolean(engine.exist_save(slot)))
        }
        DeleteSave => {
            let slot = reader.number()? as i32;
            engine.delete_save(slot);
            None
        }
        SaveThumbnail => {
            let slot = reader.number()? as i32;
            let width = reader.number()?;
            let height = reader.number()?;
            engine.save_thumbnail(slot, width, height);
            None
        }
        Random => {
            let max = reader.number()? as i32;
            Some(Value::number(engine.random(max) as f32))
        }
        Time => Some(Value::number(engine.time())),
        Platform => Some(Value::number(engine.platform() as f32)),
        ModuleFileName => Some(Value::string(engine.module_file_name())),
        ImageHorizon => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.image_horizon(path)))
        }
        ImageVertical => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.image_vertical(path)))
        }
        RemainTime => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.remain_time(path)))
        }
        PassageTime => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.passage_time(path)))
        }
        DurationTime => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.duration_time(path)))
        }
        StrLength => {
            let text = reader.string()?;
            Some(Value::number(text.chars().count() as f32))
        }
        Integer => {
            let value = reader.number()?;
            Some(Value::number(value.trunc()))
        }
        StringFormat => {
            let format = reader.string()?.to_string();
            let mut out = String::new();
            let mut parts = format.split("%s");
            if let Some(first) = parts.next() {
                out.push_str(first);
            }
            for part in parts {
                match reader.next_value() {
                    Ok(value) => out.push_str(&value.to_string()),
                    Err(_) => {}
                }
                out.push_str(part);
            }
            Some(Value::string(out))
        }
        ScrollbarValue => {
            let path = reader.entity_path()?;
            Some(Value::number(engine.scrollbar_value(path)))
        }
        Exit => {
            engine.exit();
            None
        }
        Wait | WaitKey | WaitFrame | CreateThread | TerminateThread | CreateProcess
        | PauseProcess | ResumeProcess | TerminateProcess => {
            unreachable!("vm-control built-in reached the host dispatcher")
        }
    };
    Ok(result)
}

fn constant_arg(reader: &mut ArgReader<'_>) -> Result<BuiltinConstant, DispatchError> {
    let index = reader.cursor;
    let value = reader.next_value()?;
    match value.kind {
        ValueKind::BuiltinConstant(constant) => Ok(constant),
        ref other => Err(DispatchError {
            builtin: reader.builtin.name(),
            index,
            expected: "builtin-constant",
            actual: other.kind_name(),
        }),
    }
}

fn optional_bool(reader: &mut ArgReader<'_>) -> Result<bool, DispatchError> {
    if reader.remaining() == 0 {
        return Ok(false);
    }
    let index = reader.cursor;
    let value = reader.next_value()?;
    match &value.kind {
        ValueKind::Bool(b) => Ok(*b),
        ValueKind::Null => Ok(false),
        ValueKind::Number(n) => Ok(*n != 0.0),
        other => Err(DispatchError {
            builtin: reader.builtin.name(),
            index,
            expected: "bool",
            actual: other.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::GlobalStore;

    #[derive(Default)]
    struct Recorder {
        moves: Vec<(String, Duration, Option<EaseFunction>, Duration)>,
        colors: Vec<NsColor>,
    }

    impl EngineCallbacks for Recorder {
        fn do_move(
            &mut self,
            query: EntityQuery,
            duration: Duration,
            _x: &Value,
            _y: &Value,
            ease: Option<EaseFunction>,
            delay: Duration,
        ) {
            self.moves.push((query.0, duration, ease, delay));
        }

        fn set_shade(&mut self, _query: EntityQuery, color: NsColor) {
            self.colors.push(color);
        }

        fn cursor_position(&mut self) -> (f32, f32) {
            (120.0, 64.0)
        }
    }

    fn run(
        engine: &mut Recorder,
        builtin: BuiltinFunction,
        args: Vec<Value>,
    ) -> Result<Option<Value>, DispatchError> {
        let mut globals = GlobalStore::new();
        dispatch(engine, &mut globals, builtin, &args)
    }

    #[test]
    fn wrong_kind_reports_zero_based_index() {
        let mut engine = Recorder::default();
        let err = run(
            &mut engine,
            BuiltinFunction::SetShade,
            vec![Value::string("sprite"), Value::boolean(true)],
        )
        .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.actual, "bool");
    }

    #[test]
    fn move_heuristic_swaps_on_constant_last_argument() {
        let mut engine = Recorder::default();
        // Old layout: (..., delay, ease) with the constant last.
        run(
            &mut engine,
            BuiltinFunction::Move,
            vec![
                Value::string("sprite"),
                Value::number(1000.0),
                Value::number(10.0),
                Value::number(20.0),
                Value::number(500.0),
                Value::constant(BuiltinConstant::Axl1),
            ],
        )
        .unwrap();
        // Declared layout: (..., ease, delay).
        run(
            &mut engine,
            BuiltinFunction::Move,
            vec![
                Value::string("sprite"),
                Value::number(1000.0),
                Value::number(10.0),
                Value::number(20.0),
                Value::constant(BuiltinConstant::Axl1),
                Value::number(500.0),
            ],
        )
        .unwrap();
        for (_, _, ease, delay) in &engine.moves {
            assert_eq!(*ease, Some(EaseFunction::QuadIn));
            assert_eq!(*delay, Duration::from_millis(500));
        }
    }

    #[test]
    fn out_params_write_through_retained_slots() {
        let mut engine = Recorder::default();
        let mut globals = GlobalStore::new();
        dispatch(
            &mut engine,
            &mut globals,
            BuiltinFunction::CursorPosition,
            &[
                Value::number(0.0).from_slot(3),
                Value::number(0.0).from_slot(4),
            ],
        )
        .unwrap();
        assert_eq!(globals.get(3).as_number(), Some(120.0));
        assert_eq!(globals.get(4).as_number(), Some(64.0));
    }

    #[test]
    fn color_decodes_from_every_encoding() {
        let red = NsColor { r: 255, g: 0, b: 0 };
        let mut engine = Recorder::default();
        for arg in [
            Value::number(0xFF0000 as f32),
            Value::string("#FF0000"),
            Value::string("red"),
            Value::constant(BuiltinConstant::Red),
        ] {
            run(
                &mut engine,
                BuiltinFunction::SetShade,
                vec![Value::string("bg"), arg],
            )
            .unwrap();
        }
        assert!(engine.colors.iter().all(|c| *c == red));
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(
            lookup_builtin("createtexture"),
            Some(BuiltinFunction::CreateTexture)
        );
        assert_eq!(lookup_constant("AXL1"), Some(BuiltinConstant::Axl1));
        assert_eq!(lookup_builtin("NoSuchBuiltin"), None);
    }
}
