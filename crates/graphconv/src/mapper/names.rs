use std::collections::HashSet;

/// Hands out tensor and node names that collide with nothing seen so far.
///
/// One allocator lives for one conversion. The suffix counter only grows, so two
/// decompositions of the same operator never share an internal name.
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
    counter: usize,
}

impl NameAllocator {
    pub fn new<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: reserved.into_iter().map(Into::into).collect(),
            counter: 0,
        }
    }

    /// Records an externally chosen name.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// A fresh `{base}_{n}` name.
    pub fn fresh(&mut self, base: &str) -> String {
        loop {
            let name = format!("{base}_{}", self.counter);
            self.counter += 1;
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_reserved_names() {
        let mut names = NameAllocator::new(["slope_0", "slope_2"]);
        assert_eq!(names.fresh("slope"), "slope_1");
        assert_eq!(names.fresh("slope"), "slope_3");
    }

    #[test]
    fn counter_is_shared_across_bases() {
        let mut names = NameAllocator::default();
        assert_eq!(names.fresh("a"), "a_0");
        assert_eq!(names.fresh("b"), "b_1");
        assert_eq!(names.fresh("a"), "a_2");
    }
}
