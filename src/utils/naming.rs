// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Daemon identity letters: 0 -> `a`, 25 -> `z`, 26 -> `aa`.

pub fn index_to_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        let i = index % 26;
        name.push(b'a' + i as u8);
        index -= i;
        if index == 0 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

pub fn name_to_index(name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for c in name.bytes() {
        if !c.is_ascii_lowercase() {
            return None;
        }
        n = n.checked_mul(26)?.checked_add((c - b'a') as usize + 1)?;
    }
    Some(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_name() {
        assert_eq!(index_to_name(0), "a");
        assert_eq!(index_to_name(25), "z");
        assert_eq!(index_to_name(26), "aa");
        assert_eq!(index_to_name(27), "ab");
        assert_eq!(index_to_name(52), "ba");
        assert_eq!(index_to_name(701), "zz");
        assert_eq!(index_to_name(702), "aaa");
    }

    #[test]
    fn test_name_to_index_inverts() {
        for i in [0, 1, 25, 26, 51, 52, 700, 701, 702] {
            assert_eq!(name_to_index(&index_to_name(i)), Some(i));
        }
        assert_eq!(name_to_index(""), None);
        assert_eq!(name_to_index("a-canary"), None);
    }
}
