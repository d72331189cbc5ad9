use std::fmt;
use std::sync::Arc;

use crate::grammars::{CompiledGrammar, ROOT_RULE_ID, RuleId};
use crate::scope::Scope;

#[derive(Clone, Debug)]
pub(crate) struct StackFrame {
    parent: Option<Arc<StackFrame>>,
    /// Number of frames below this one
    depth: usize,
    /// Rule that created this stack element
    pub rule_id: RuleId,
    /// "name" scopes - applied to begin/end delimiters
    /// These scopes are active when matching the rule's boundaries
    pub name_scopes: Vec<Scope>,
    /// "contentName" scopes - applied to content between delimiters
    /// These scopes are active for the rule's interior content
    pub content_scopes: Vec<Scope>,
    /// Dynamic end/while pattern resolved with backreferences
    /// For BeginEnd rules: the end pattern with \1, \2, etc. resolved
    /// For BeginWhile rules: the while pattern with backreferences resolved
    pub end_pattern: Option<String>,
    /// The state has entered and captured \n.
    /// This means that the next line should start with an anchor_position of 0.
    pub begin_rule_has_captured_eol: bool,
    /// Where we currently are in a line
    pub anchor_position: Option<usize>,
    /// The position where this rule was entered during current line (for infinite loop detection)
    /// None at beginning of a line
    pub enter_position: Option<usize>,
}

impl StackFrame {
    /// Equality that ignores the per-line bookkeeping
    fn same_state(&self, other: &StackFrame) -> bool {
        self.rule_id == other.rule_id
            && self.end_pattern == other.end_pattern
            && self.name_scopes == other.name_scopes
            && self.content_scopes == other.content_scopes
    }
}

/// Keeps track of nested context as well as how to exit that context and the captures
/// strings used in backreferences.
///
/// This is a persistent stack: frames are shared between all the stacks derived from
/// the same one, so cloning is cheap and a stack given to `tokenize_line` is never
/// modified.
#[derive(Clone)]
pub struct StateStack {
    top: Arc<StackFrame>,
}

impl StateStack {
    /// A stack with only the root frame of that grammar
    pub fn new(grammar: &CompiledGrammar) -> Self {
        Self {
            top: Arc::new(StackFrame {
                parent: None,
                depth: 0,
                rule_id: ROOT_RULE_ID,
                name_scopes: vec![grammar.scope],
                content_scopes: vec![grammar.scope],
                end_pattern: None,
                begin_rule_has_captured_eol: false,
                anchor_position: None,
                enter_position: None,
            }),
        }
    }

    /// How many begin/end or begin/while contexts are open, 0 being the root only
    pub fn depth(&self) -> usize {
        self.top.depth
    }

    pub fn is_root(&self) -> bool {
        self.top.parent.is_none()
    }

    /// Scopes applied to text in the innermost open context, root scope first
    pub fn scopes(&self) -> &[Scope] {
        &self.top.content_scopes
    }

    /// Rule of the innermost open context
    pub fn rule_id(&self) -> RuleId {
        self.top.rule_id
    }

    /// Called when entering a nested context: when a BeginEnd or BeginWhile begin pattern matches
    pub(crate) fn push(
        &mut self,
        rule_id: RuleId,
        anchor_position: Option<usize>,
        begin_rule_has_captured_eol: bool,
        enter_position: Option<usize>,
        scopes: Vec<Scope>,
    ) {
        let parent = self.top.clone();
        self.top = Arc::new(StackFrame {
            depth: parent.depth + 1,
            parent: Some(parent),
            rule_id,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
            end_pattern: None,
            begin_rule_has_captured_eol,
            anchor_position,
            enter_position,
        });
    }

    pub(crate) fn set_content_scopes(&mut self, content_scopes: Vec<Scope>) {
        self.top_mut().content_scopes = content_scopes;
    }

    pub(crate) fn set_end_pattern(&mut self, end_pattern: String) {
        self.top_mut().end_pattern = Some(end_pattern);
    }

    /// Exits the current context, getting back to the parent.
    /// The root frame is never popped.
    pub(crate) fn pop(&mut self) -> Option<Arc<StackFrame>> {
        let parent = self.top.parent.clone()?;
        Some(std::mem::replace(&mut self.top, parent))
    }

    /// Puts back a frame that was just popped
    pub(crate) fn restore(&mut self, frame: Arc<StackFrame>) {
        debug_assert!(
            frame
                .parent
                .as_ref()
                .is_some_and(|p| Arc::ptr_eq(p, &self.top))
        );
        self.top = frame;
    }

    /// Pops frames until only `depth` contexts are left open
    pub(crate) fn truncate(&mut self, depth: usize) {
        while self.depth() > depth && self.pop().is_some() {}
    }

    /// Resets enter_position/anchor_position for all stack elements to None.
    /// Frames that are already clean stay shared.
    pub(crate) fn reset(&mut self) {
        let frames = self.frames();
        let Some(first_dirty) = frames
            .iter()
            .position(|f| f.anchor_position.is_some() || f.enter_position.is_some())
        else {
            return;
        };

        let mut parent = frames[first_dirty].parent.clone();
        for frame in &frames[first_dirty..] {
            let mut frame = StackFrame::clone(frame);
            frame.parent = parent;
            frame.anchor_position = None;
            frame.enter_position = None;
            parent = Some(Arc::new(frame));
        }
        if let Some(top) = parent {
            self.top = top;
        }
    }

    /// Access the top frame of the stack
    pub(crate) fn top(&self) -> &StackFrame {
        &self.top
    }

    /// Mutable access to the top frame, copying it first if it's shared
    pub(crate) fn top_mut(&mut self) -> &mut StackFrame {
        Arc::make_mut(&mut self.top)
    }

    /// All the frames, root first
    pub(crate) fn frames(&self) -> Vec<Arc<StackFrame>> {
        let mut frames = Vec::with_capacity(self.depth() + 1);
        let mut current = Some(self.top.clone());
        while let Some(frame) = current {
            current = frame.parent.clone();
            frames.push(frame);
        }
        frames.reverse();
        frames
    }

    /// Whether `other`, which was just pushed on top of us, pushes a rule that was already
    /// entered at the same position: the grammar would loop forever without advancing.
    pub(crate) fn has_same_rule_as(&self, other: &StateStack) -> bool {
        let mut current = Some(&self.top);
        while let Some(frame) = current
            && frame.enter_position == other.top.enter_position
        {
            if frame.rule_id == other.top.rule_id {
                return true;
            }
            current = frame.parent.as_ref();
        }
        false
    }

    /// Builds a stack whose top is the given frame
    pub(crate) fn from_frame(frame: Arc<StackFrame>) -> Self {
        Self { top: frame }
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        if self.depth() != other.depth() {
            return false;
        }
        let mut a = Some(&self.top);
        let mut b = Some(&other.top);
        while let (Some(x), Some(y)) = (a, b) {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            if !x.same_state(y) {
                return false;
            }
            a = x.parent.as_ref();
            b = y.parent.as_ref();
        }
        true
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        for frame in self.frames() {
            let indent = "  ".repeat(frame.depth);
            write!(f, "{}rule={}", indent, frame.rule_id.0)?;

            if !frame.name_scopes.is_empty() {
                write!(f, " name=[")?;
                for (i, scope) in frame.name_scopes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", scope)?;
                }
                write!(f, "]")?;
            }

            if !frame.content_scopes.is_empty() {
                write!(f, ", content=[")?;
                for (i, scope) in frame.content_scopes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", scope)?;
                }
                write!(f, "]")?;
            }

            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern=\"{}\"", pattern)?;
            }

            write!(f, ", anchor_pos={:?}", frame.anchor_position)?;

            if let Some(enter_pos) = frame.enter_position
                && frame.anchor_position != Some(enter_pos)
            {
                write!(f, ", enter_pos={}", enter_pos)?;
            }

            write!(
                f,
                ", begin_rule_has_captured_eol={}",
                frame.begin_rule_has_captured_eol
            )?;

            writeln!(f)?;
        }

        Ok(())
    }
}
