//! 空间索引树遍历
//!
//! OBF 的地图分区与路网分区都用同一种递归包围盒树组织数据：
//!
//! ```text
//! Box (4 字节大端长度前缀)
//!   1..4  left/right/top/bottom   sint32，相对父节点同名字段的增量
//!   5     shiftToData             4 字节大端，相对本节点 payload 起点
//!   6     ocean                   bool (仅地图分区)
//!   7     boxes                   子节点 (重复)
//! ```
//!
//! 算法：
//! - 读完边界字段后立即与查询框求交，不相交则跳过整棵子树 (不读取任何子节点)
//! - 叶节点 (带 shiftToData) 收集到列表，由调用方按数据块偏移排序后顺序读取

use crate::area::AreaI;
use crate::error::{ObfError, ObfResult};
use crate::obf_codec::{tag_field, CodedInput};
use crate::query::{is_aborted, OceanStats, QueryController, QueryStats};

pub(crate) const FIELD_LEFT: u32 = 1;
pub(crate) const FIELD_RIGHT: u32 = 2;
pub(crate) const FIELD_TOP: u32 = 3;
pub(crate) const FIELD_BOTTOM: u32 = 4;
pub(crate) const FIELD_SHIFT_TO_DATA: u32 = 5;
pub(crate) const FIELD_OCEAN: u32 = 6;
pub(crate) const FIELD_BOXES: u32 = 7;

/// 解码后的树节点 (绝对坐标)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub bbox31: AreaI,
    /// payload 起始偏移 (长度前缀之后)
    pub offset: usize,
    pub length: usize,
    /// 数据块偏移 (指向数据块的 varint 长度前缀)
    pub data_offset: Option<usize>,
    pub ocean: Option<bool>,
    pub has_children: bool,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.data_offset.is_some()
    }
}

/// 一次遍历的上下文
pub struct TreeWalk<'q> {
    pub query: Option<AreaI>,
    pub controller: Option<&'q dyn QueryController>,
    pub leaves: Vec<TreeNode>,
    pub stats: QueryStats,
    pub ocean: OceanStats,
}

impl<'q> TreeWalk<'q> {
    /// 只读取节点头部，不向下遍历
    pub fn headers_only() -> Self {
        Self {
            query: None,
            controller: None,
            leaves: Vec::new(),
            stats: QueryStats::default(),
            ocean: OceanStats::default(),
        }
    }

    pub fn search(query: AreaI, controller: Option<&'q dyn QueryController>) -> Self {
        Self {
            query: Some(query),
            controller,
            leaves: Vec::new(),
            stats: QueryStats::default(),
            ocean: OceanStats::default(),
        }
    }

    /// 按数据块偏移排序并去重，把随机访问变为顺序扫描
    pub fn take_sorted_leaves(&mut self) -> Vec<TreeNode> {
        let mut leaves = std::mem::take(&mut self.leaves);
        leaves.sort_by_key(|n| n.data_offset);
        leaves.dedup_by_key(|n| n.data_offset);
        leaves
    }
}

/// 读取一个树节点；调用方已读取 tag，当前位于 4 字节长度前缀处
///
/// 带查询框时递归下降到相交的子节点；不相交的节点返回 `None` 且不读取其子树。
pub fn read_tree_node(
    input: &mut CodedInput<'_>,
    parent: &AreaI,
    walk: &mut TreeWalk<'_>,
) -> ObfResult<Option<TreeNode>> {
    let (start, length, old_limit) = input.enter_fixed32_message()?;
    walk.stats.subtrees_read += 1;

    let mut bbox = *parent;
    let mut checked = false;
    let mut node = TreeNode {
        bbox31: bbox,
        offset: start,
        length,
        data_offset: None,
        ocean: None,
        has_children: false,
    };

    let result = loop {
        let tag = input.read_tag()?;
        let field = tag_field(tag);

        // 边界字段总在最前；遇到其它字段 (或结束) 时进行相交检查
        if !checked && !(FIELD_LEFT..=FIELD_BOTTOM).contains(&field) {
            checked = true;
            node.bbox31 = bbox;
            if let Some(query) = &walk.query {
                if !bbox.intersects(query) {
                    input.seek(start + length)?;
                    break None;
                }
                walk.stats.subtrees_accepted += 1;
            }
        }

        match field {
            0 => break Some(()),
            FIELD_LEFT => bbox.left = parent.left.wrapping_add(input.read_sint32()?),
            FIELD_RIGHT => bbox.right = parent.right.wrapping_add(input.read_sint32()?),
            FIELD_TOP => bbox.top = parent.top.wrapping_add(input.read_sint32()?),
            FIELD_BOTTOM => bbox.bottom = parent.bottom.wrapping_add(input.read_sint32()?),
            FIELD_SHIFT_TO_DATA => {
                let shift = input.read_fixed32_be()? as usize;
                node.data_offset = Some(start + shift);
            }
            FIELD_OCEAN => node.ocean = Some(input.read_bool()?),
            FIELD_BOXES => {
                node.has_children = true;
                if walk.query.is_some() {
                    if is_aborted(walk.controller) {
                        input.seek(start + length)?;
                        break Some(());
                    }
                    read_child_node(input, &node.bbox31, start + length, walk)?;
                } else {
                    input.skip_field(tag)?;
                }
            }
            _ => input.skip_field(tag)?,
        }
    };
    input.pop_limit(old_limit);

    if result.is_none() {
        return Ok(None);
    }
    if walk.query.is_some() {
        if let (Some(ocean), false) = (node.ocean, node.has_children) {
            walk.ocean.record(ocean);
        }
        if node.is_leaf() {
            walk.leaves.push(node.clone());
        }
    }
    Ok(Some(node))
}

/// 读取子节点；子树损坏时只丢弃该子树，兄弟节点照常读取
fn read_child_node(
    input: &mut CodedInput<'_>,
    parent: &AreaI,
    parent_end: usize,
    walk: &mut TreeWalk<'_>,
) -> ObfResult<()> {
    let child_pos = input.position();
    let Err(e) = read_tree_node(input, parent, walk) else {
        return Ok(());
    };
    tracing::warn!(offset = child_pos, error = %e, "skipping broken subtree");
    // 出错时嵌套的 limit 未弹出，恢复到父节点边界
    input.pop_limit(parent_end);
    input.seek(child_pos)?;
    let child_end = input
        .read_fixed32_be()
        .ok()
        .and_then(|len| child_pos.checked_add(4 + len as usize))
        .filter(|&end| end <= parent_end)
        .unwrap_or(parent_end);
    input.seek(child_end)
}

/// 从已缓存的根节点重新下降
pub fn descend_from_root(
    input: &mut CodedInput<'_>,
    root: &TreeNode,
    parent: &AreaI,
    walk: &mut TreeWalk<'_>,
) -> ObfResult<()> {
    if root.offset < 4 {
        return Err(ObfError::Truncated {
            offset: root.offset,
            limit: input.limit(),
        });
    }
    input.seek(root.offset - 4)?;
    read_tree_node(input, parent, walk)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obf_codec::{wire_type, CodedOutput};

    /// 写入一个节点：bbox 为绝对坐标，函数负责转为相对父节点的增量
    fn write_node(out: &mut CodedOutput, bbox: AreaI, parent: AreaI, children: &[AreaI]) {
        let pos = out.begin_fixed32_message(FIELD_BOXES);
        out.write_sint32_field(FIELD_LEFT, bbox.left - parent.left);
        out.write_sint32_field(FIELD_RIGHT, bbox.right - parent.right);
        out.write_sint32_field(FIELD_TOP, bbox.top - parent.top);
        out.write_sint32_field(FIELD_BOTTOM, bbox.bottom - parent.bottom);
        if children.is_empty() {
            out.write_tag(FIELD_SHIFT_TO_DATA, wire_type::FIXED32);
            out.write_fixed32_be(100);
            out.write_bool_field(FIELD_OCEAN, true);
        }
        for child in children {
            write_node(out, *child, bbox, &[]);
        }
        out.end_fixed32_message(pos);
    }

    #[test]
    fn test_prunes_non_intersecting_subtree() {
        let root = AreaI::new(0, 0, 1000, 1000);
        let mut out = CodedOutput::new();
        write_node(
            &mut out,
            root,
            AreaI::default(),
            &[
                AreaI::new(0, 0, 400, 400),
                AreaI::new(600, 600, 1000, 1000),
                AreaI::new(0, 600, 400, 1000),
            ],
        );
        let bytes = out.into_bytes();

        let mut input = CodedInput::new(&bytes);
        input.read_tag().unwrap();
        let mut walk = TreeWalk::search(AreaI::new(10, 10, 20, 20), None);
        let node = read_tree_node(&mut input, &AreaI::default(), &mut walk)
            .unwrap()
            .unwrap();
        assert_eq!(node.bbox31, root);
        // 根 + 3 个子节点头部被读取，只有根与第一个子节点被接受
        assert_eq!(walk.stats.subtrees_read, 4);
        assert_eq!(walk.stats.subtrees_accepted, 2);
        assert_eq!(walk.leaves.len(), 1);
        assert_eq!(walk.leaves[0].bbox31, AreaI::new(0, 0, 400, 400));
        assert_eq!(walk.ocean.tiles, 1);
    }

    #[test]
    fn test_broken_child_keeps_siblings() {
        let root = AreaI::new(0, 0, 1000, 1000);
        let mut out = CodedOutput::new();
        let pos = out.begin_fixed32_message(FIELD_BOXES);
        out.write_sint32_field(FIELD_LEFT, 0);
        out.write_sint32_field(FIELD_RIGHT, 1000);
        out.write_sint32_field(FIELD_TOP, 0);
        out.write_sint32_field(FIELD_BOTTOM, 1000);
        write_node(&mut out, AreaI::new(0, 0, 400, 400), root, &[]);
        // 长度正确但内容截断的子节点
        let broken = out.begin_fixed32_message(FIELD_BOXES);
        out.write_tag(FIELD_LEFT, wire_type::VARINT);
        out.end_fixed32_message(broken);
        write_node(&mut out, AreaI::new(0, 600, 400, 1000), root, &[]);
        out.end_fixed32_message(pos);
        let bytes = out.into_bytes();

        let mut input = CodedInput::new(&bytes);
        input.read_tag().unwrap();
        let mut walk = TreeWalk::search(root, None);
        let node = read_tree_node(&mut input, &AreaI::default(), &mut walk)
            .unwrap()
            .unwrap();
        assert_eq!(node.bbox31, root);
        assert_eq!(walk.stats.subtrees_read, 4);
        assert_eq!(walk.leaves.len(), 2);
        assert_eq!(walk.leaves[1].bbox31, AreaI::new(0, 600, 400, 1000));
        assert!(input.at_end());
    }

    #[test]
    fn test_pruned_root_never_reads_children() {
        let mut out = CodedOutput::new();
        write_node(
            &mut out,
            AreaI::new(0, 0, 100, 100),
            AreaI::default(),
            &[AreaI::new(0, 0, 50, 50), AreaI::new(50, 50, 100, 100)],
        );
        let bytes = out.into_bytes();
        let mut input = CodedInput::new(&bytes);
        input.read_tag().unwrap();
        let mut walk = TreeWalk::search(AreaI::new(500, 500, 600, 600), None);
        let node = read_tree_node(&mut input, &AreaI::default(), &mut walk).unwrap();
        assert!(node.is_none());
        assert_eq!(walk.stats.subtrees_read, 1);
        assert_eq!(walk.stats.subtrees_accepted, 0);
        assert!(walk.leaves.is_empty());
        assert!(input.at_end());
    }

    #[test]
    fn test_headers_only_skips_children() {
        let mut out = CodedOutput::new();
        write_node(
            &mut out,
            AreaI::new(0, 0, 100, 100),
            AreaI::default(),
            &[AreaI::new(0, 0, 50, 50)],
        );
        let bytes = out.into_bytes();
        let mut input = CodedInput::new(&bytes);
        input.read_tag().unwrap();
        let mut walk = TreeWalk::headers_only();
        let node = read_tree_node(&mut input, &AreaI::default(), &mut walk)
            .unwrap()
            .unwrap();
        assert!(node.has_children);
        assert_eq!(walk.stats.subtrees_read, 1);
        assert_eq!(node.offset, 5);
    }
}
