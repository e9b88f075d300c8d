/**
 * PARAMÈTRES UBUS-CLI - Parsing des dumps `chemin.pointé=valeur`
 *
 * RÔLE :
 * Transforme la sortie brute de `ubus-cli <Objet>.?` en map plate
 * chemin → valeur brute. Aucun typage ici : le device peut renvoyer des
 * chaînes quotées, des booléens en toutes lettres ou des nombres, c'est
 * chaque consommateur qui interprète sa clé.
 *
 * FORMAT :
 * ```text
 * > SoftwareModules.?
 * SoftwareModules.
 * SoftwareModules.DeploymentUnitNumberOfEntries=2
 * SoftwareModules.DeploymentUnit.1.URL="docker://registry/app:1.0"
 * ```
 * Les lignes `>` (prompt) et les marqueurs de collection finissant par `.`
 * ne produisent aucune entrée. Le parser n'échoue jamais.
 */

use std::collections::BTreeMap;

pub type ParameterMap = BTreeMap<String, String>;

pub fn parse(raw: &str) -> ParameterMap {
    let mut map = ParameterMap::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('>') {
            continue;
        }
        // premier '=' seulement : les valeurs peuvent contenir '='
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Retire les guillemets entourant une valeur (`"Active"` → `Active`)
pub fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(v)
}

pub fn get_str<'a>(map: &'a ParameterMap, key: &str) -> Option<&'a str> {
    map.get(key).map(|v| unquote(v))
}

pub fn get_u32(map: &ParameterMap, key: &str, default: u32) -> u32 {
    get_str(map, key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Plafond des compteurs `...NumberOfEntries` : la valeur vient du device
pub const MAX_COLLECTION_ENTRIES: u32 = 256;

/// Compteur de collection borné à `MAX_COLLECTION_ENTRIES` (absent ou illisible → 0)
pub fn get_count(map: &ParameterMap, key: &str) -> u32 {
    let count = get_u32(map, key, 0);
    if count > MAX_COLLECTION_ENTRIES {
        tracing::warn!("{key}={count} exceeds {MAX_COLLECTION_ENTRIES}, clamped");
        return MAX_COLLECTION_ENTRIES;
    }
    count
}

pub fn get_i64(map: &ParameterMap, key: &str, default: i64) -> i64 {
    get_str(map, key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Première clé (ordre lexicographique) se terminant par `suffix`
pub fn find_suffix<'a>(map: &'a ParameterMap, suffix: &str) -> Option<(&'a str, &'a str)> {
    map.iter()
        .find(|(k, _)| k.ends_with(suffix))
        .map(|(k, v)| (k.as_str(), unquote(v)))
}

/// Première valeur trouvée parmi plusieurs suffixes, essayés dans l'ordre
pub fn first_suffixed<'a>(map: &'a ParameterMap, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|s| find_suffix(map, s).map(|(_, v)| v))
}

/// Valeur mesurée → nombre ; "12.5%", "37" ou rien. Absent ou illisible → 0.
pub fn parse_measurement(raw: &str) -> f64 {
    let cleaned = unquote(raw).trim().trim_end_matches('%').trim();
    let numeric: String = cleaned
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    numeric.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}
