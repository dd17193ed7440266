// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static ICON_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel~=icon][href]").expect("static selector"));

/// 从HTML中提取的摘要信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlSummary {
    pub title: Option<String>,
    /// favicon的原始href
    pub favicon_href: Option<String>,
    /// 文本节点内容，空白已折叠
    pub text: String,
}

/// 解析HTML并提取标题、favicon链接和文本
pub fn summarize_html(body: &str) -> HtmlSummary {
    let document = Html::parse_document(body);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let favicon_href = document
        .select(&ICON_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    let text = collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "));

    HtmlSummary {
        title,
        favicon_href,
        text,
    }
}

/// 折叠连续空白
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 响应体预览：折叠空白后截取前 `max_chars` 个字符
pub fn body_preview(body: &str, max_chars: usize) -> String {
    collapse_whitespace(body).chars().take(max_chars).collect()
}

/// 单词数
pub fn count_words(body: &str) -> usize {
    body.split_whitespace().count()
}

/// 行数
pub fn count_lines(body: &str) -> usize {
    body.lines().count()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// 响应头哈希：按名称排序后的 `name: value` 行
pub fn header_hash(headers: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in headers {
        hasher.update(name.as_bytes());
        hasher.update(b": ");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// MurmurHash3 (x86, 32位)
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= (*byte as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

/// favicon哈希（Shodan方式）
///
/// 对每76个字符换行的base64编码做mmh3，结果按有符号整数解释
pub fn favicon_hash(data: &[u8]) -> i32 {
    let encoded = BASE64.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for line in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        wrapped.push_str(&String::from_utf8_lossy(line));
        wrapped.push('\n');
    }
    murmur3_32(wrapped.as_bytes(), 0) as i32
}

/// 64位SimHash
///
/// 按空白切分后对每个词做哈希，逐位累加权重
pub fn simhash(content: &str) -> u64 {
    let mut bits = [0i32; 64];
    let mut any = false;
    for word in content.split_whitespace() {
        any = true;
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let word_hash = hasher.finish();

        for (i, bit) in bits.iter_mut().enumerate() {
            if (word_hash >> i) & 1 == 1 {
                *bit += 1;
            } else {
                *bit -= 1;
            }
        }
    }
    if !any {
        return 0;
    }

    bits.iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .fold(0u64, |acc, (i, _)| acc | (1 << i))
}

/// 每次响应都会变化、不参与SimHash的响应头
const VOLATILE_HEADERS: &[&str] = &[
    "age",
    "content-length",
    "date",
    "etag",
    "expires",
    "last-modified",
    "set-cookie",
    "x-request-id",
];

/// SimHash的输入：状态行、排序后的稳定响应头和正文文本
///
/// 没有正文的响应（30x、204、HEAD）靠状态码和Location等头部区分
pub fn simhash_document(status_code: u16, headers: &BTreeMap<String, String>, text: &str) -> String {
    let mut document = format!("HTTP {}\n", status_code);
    for (name, value) in headers {
        if VOLATILE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        document.push_str(name);
        document.push_str(": ");
        document.push_str(value);
        document.push('\n');
    }
    document.push_str(text);
    document
}

/// 两个哈希之间的汉明距离
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
