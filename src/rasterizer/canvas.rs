//! 画布与后端抽象
//!
//! `Canvas` 只描述绘制调用 (路径填充 / 描边、位图、文字)，`RasterBackend` 负责分配画布
//! 并把画好的画布收尾为位图。软件后端见 `software` 模块。

use crate::error::ObfResult;
use bytemuck::{Pod, Zeroable};
use kurbo::{BezPath, Point, Rect};
use std::sync::Arc;

// ============================================================================
// 像素与位图
// ============================================================================

/// RGBA8 像素 (非预乘)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Rgba8 = Rgba8 { r: 0, g: 0, b: 0, a: 0 };

    /// 样式颜色为 0xAARRGGBB
    pub const fn from_argb(argb: u32) -> Self {
        Self {
            r: (argb >> 16) as u8,
            g: (argb >> 8) as u8,
            b: argb as u8,
            a: (argb >> 24) as u8,
        }
    }

    pub const fn to_argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// 源在上的 alpha 混合
    pub fn blend_over(self, src: Rgba8) -> Rgba8 {
        let sa = u32::from(src.a);
        if sa == 0 {
            return self;
        }
        if sa == 255 {
            return src;
        }
        let da = u32::from(self.a);
        let out_a = sa + da * (255 - sa) / 255;
        if out_a == 0 {
            return Rgba8::TRANSPARENT;
        }
        let mix = |s: u8, d: u8| -> u8 {
            let s = u32::from(s) * sa;
            let d = u32::from(d) * da * (255 - sa) / 255;
            ((s + d) / out_a) as u8
        };
        Rgba8 {
            r: mix(src.r, self.r),
            g: mix(src.g, self.g),
            b: mix(src.b, self.b),
            a: out_a as u8,
        }
    }
}

/// 栅格化结果
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
}

impl Bitmap {
    /// 已分配好的像素缓冲
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Rgba8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, color: Rgba8) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgba8] {
        &mut self.pixels
    }

    /// 按字节视图导出 (RGBA 顺序)
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

// ============================================================================
// 画笔
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRule {
    NonZero,
    EvenOdd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

impl LineCap {
    pub fn parse(name: &str) -> LineCap {
        match name {
            "ROUND" | "round" => LineCap::Round,
            "SQUARE" | "square" => LineCap::Square,
            _ => LineCap::Butt,
        }
    }
}

/// 虚线间隔 (像素，实 / 空交替)
#[derive(Debug, Clone, PartialEq)]
pub struct DashPattern {
    pub intervals: Vec<f64>,
    pub phase: f64,
}

impl DashPattern {
    pub fn period(&self) -> f64 {
        self.intervals.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillPaint {
    pub color: u32,
    pub rule: FillRule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokePaint {
    pub color: u32,
    pub width: f64,
    pub cap: LineCap,
    pub dash: Option<Arc<DashPattern>>,
    /// 模糊半径，0 为不模糊
    pub blur: f64,
}

impl StrokePaint {
    pub fn solid(color: u32, width: f64) -> Self {
        Self {
            color,
            width,
            cap: LineCap::Butt,
            dash: None,
            blur: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextPaint {
    pub font: Arc<str>,
    pub size: f64,
    pub color: u32,
    pub bold: bool,
    pub italic: bool,
    /// 大于 0 时先描出光晕
    pub halo_radius: f64,
    pub halo_color: u32,
}

// ============================================================================
// 画布与后端
// ============================================================================

pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn clear(&mut self, color: u32);
    fn fill_path(&mut self, path: &BezPath, paint: &FillPaint);
    fn stroke_path(&mut self, path: &BezPath, paint: &StrokePaint);
    fn draw_bitmap(&mut self, bitmap: &Bitmap, dest: Rect);
    /// 多行文字，`origin` 为首行基线起点
    fn draw_text(&mut self, lines: &[String], origin: Point, paint: &TextPaint);
    fn draw_text_on_path(&mut self, text: &str, path: &[Point], paint: &TextPaint);

    fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width()), f64::from(self.height()))
    }
}

/// 栅格化后端
///
/// 分配失败必须返回错误，不得交回部分画布。
pub trait RasterBackend: Send + Sync {
    type Canvas: Canvas;

    fn name(&self) -> &'static str;
    fn create_canvas(&self, width: u32, height: u32) -> ObfResult<Self::Canvas>;
    fn finish(&self, canvas: Self::Canvas) -> Bitmap;
}
