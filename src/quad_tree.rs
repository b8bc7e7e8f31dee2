//! 符号碰撞检测用四叉树
//!
//! 存放已放置符号的屏幕包围盒。跨越子象限分界的盒子留在当前节点，
//! 其余下沉到完全包含它的子节点。

use kurbo::Rect;

const MAX_DEPTH: usize = 8;
/// 节点内盒子超过该数目才分裂
const SPLIT_THRESHOLD: usize = 8;

#[derive(Debug)]
struct Node<T> {
    bounds: Rect,
    items: Vec<(Rect, T)>,
    children: Option<Box<[Node<T>; 4]>>,
}

impl<T> Node<T> {
    fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            items: Vec::new(),
            children: None,
        }
    }

    fn quadrants(bounds: &Rect) -> [Rect; 4] {
        let center = bounds.center();
        [
            Rect::new(bounds.x0, bounds.y0, center.x, center.y),
            Rect::new(center.x, bounds.y0, bounds.x1, center.y),
            Rect::new(bounds.x0, center.y, center.x, bounds.y1),
            Rect::new(center.x, center.y, bounds.x1, bounds.y1),
        ]
    }

    fn insert(&mut self, rect: Rect, value: T, depth: usize) {
        if self.children.is_none() && self.items.len() >= SPLIT_THRESHOLD && depth < MAX_DEPTH {
            self.split(depth);
        }
        if let Some(children) = self.children.as_mut() {
            if let Some(child) = children.iter_mut().find(|c| contains_rect(&c.bounds, &rect)) {
                child.insert(rect, value, depth + 1);
                return;
            }
        }
        self.items.push((rect, value));
    }

    fn split(&mut self, depth: usize) {
        let [a, b, c, d] = Self::quadrants(&self.bounds);
        let mut children = Box::new([Node::new(a), Node::new(b), Node::new(c), Node::new(d)]);
        let items = std::mem::take(&mut self.items);
        for (rect, value) in items {
            match children.iter_mut().find(|c| contains_rect(&c.bounds, &rect)) {
                Some(child) => child.insert(rect, value, depth + 1),
                None => self.items.push((rect, value)),
            }
        }
        self.children = Some(children);
    }

    // 子节点只存放被其完全包含的盒子，可按边界剪枝；根节点还可能存放越界的盒子
    fn any_intersecting(&self, rect: &Rect) -> bool {
        if self.items.iter().any(|(r, _)| overlaps(r, rect)) {
            return true;
        }
        self.children
            .as_ref()
            .map(|children| {
                children
                    .iter()
                    .any(|c| overlaps(&c.bounds, rect) && c.any_intersecting(rect))
            })
            .unwrap_or(false)
    }

    fn query<'a>(&'a self, rect: &Rect, out: &mut Vec<&'a T>) {
        out.extend(self.items.iter().filter(|(r, _)| overlaps(r, rect)).map(|(_, v)| v));
        if let Some(children) = self.children.as_ref() {
            for child in children.iter().filter(|c| overlaps(&c.bounds, rect)) {
                child.query(rect, out);
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
            + self
                .children
                .as_ref()
                .map(|children| children.iter().map(Node::len).sum())
                .unwrap_or(0)
    }
}

/// 开区间相交：仅接触边界不算碰撞
fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

fn contains_rect(outer: &Rect, inner: &Rect) -> bool {
    outer.x0 <= inner.x0 && outer.y0 <= inner.y0 && outer.x1 >= inner.x1 && outer.y1 >= inner.y1
}

#[derive(Debug)]
pub struct QuadTree<T> {
    root: Node<T>,
}

impl<T> QuadTree<T> {
    pub fn new(bounds: Rect) -> Self {
        Self {
            root: Node::new(bounds),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.root.bounds
    }

    pub fn insert(&mut self, rect: Rect, value: T) {
        self.root.insert(rect, value, 0);
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.root.any_intersecting(rect)
    }

    /// 与 rect 相交的全部值
    pub fn query(&self, rect: &Rect) -> Vec<&T> {
        let mut out = Vec::new();
        self.root.query(rect, &mut out);
        out
    }

    /// 不与已有盒子相交时插入并返回 true
    pub fn insert_if_free(&mut self, rect: Rect, value: T) -> bool {
        if self.intersects(&rect) {
            return false;
        }
        self.insert(rect, value);
        true
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
