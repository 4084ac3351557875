use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::cell::Cell;

use crate::{analisar_data, analisar_decimal};

/// Delimitador de campos (e de início/fim de registro) do Sped.
pub const DELIMITADOR: char = '|';

/// Campos de uma linha do Sped, acessados por posição.
///
/// Linhas curtas são toleradas: um índice além do último campo devolve
/// texto vazio (ou o padrão numérico), nunca um erro.
#[derive(Debug)]
pub struct Campos<'a> {
    valores: Vec<&'a str>,
    invalidos: Cell<usize>,
}

/// Divide uma linha em campos.
///
/// Retorna `None` para linha em branco. Um `|` inicial e um `|` final são
/// removidos antes da divisão.
///
/// ```
/// use sped_devolucoes_reforma::tokenize;
///
/// let campos = tokenize("|C170|1|ITEM01|\r\n").unwrap();
/// assert_eq!(campos.registro(), "C170");
/// assert_eq!(campos.texto(2), "ITEM01");
/// assert_eq!(campos.texto(30), "");
/// assert!(tokenize("   ").is_none());
/// ```
pub fn tokenize(linha: &str) -> Option<Campos<'_>> {
    let linha = linha.trim();
    if linha.is_empty() {
        return None;
    }

    let linha = linha.strip_prefix(DELIMITADOR).unwrap_or(linha);
    let linha = linha.strip_suffix(DELIMITADOR).unwrap_or(linha);

    Some(Campos {
        valores: linha.split(DELIMITADOR).collect(),
        invalidos: Cell::new(0),
    })
}

impl<'a> Campos<'a> {
    /// Tipo do registro (primeiro campo), por exemplo "C100".
    pub fn registro(&self) -> &'a str {
        self.texto(0)
    }

    pub fn len(&self) -> usize {
        self.valores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valores.is_empty()
    }

    pub fn texto(&self, indice: usize) -> &'a str {
        self.valores.get(indice).copied().unwrap_or_default()
    }

    pub fn string(&self, indice: usize) -> String {
        self.texto(indice).to_string()
    }

    /// Valor numérico; campo ausente, vazio ou inválido vale zero.
    pub fn decimal(&self, indice: usize) -> Decimal {
        let analise = analisar_decimal(self.texto(indice));
        if analise.is_invalido() {
            self.invalidos.set(self.invalidos.get() + 1);
        }
        analise.ou(Decimal::ZERO)
    }

    pub fn data(&self, indice: usize) -> Option<NaiveDate> {
        let analise = analisar_data(self.texto(indice));
        if analise.is_invalido() {
            self.invalidos.set(self.invalidos.get() + 1);
        }
        analise.valor()
    }

    /// Quantidade de campos numéricos ou de data que caíram no padrão por
    /// estarem malformados.
    pub fn campos_invalidos(&self) -> usize {
        self.invalidos.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn remove_apenas_um_delimitador_de_cada_lado() {
        let campos = tokenize("||A||").unwrap();
        assert_eq!(campos.len(), 3);
        assert_eq!(campos.texto(0), "");
        assert_eq!(campos.texto(1), "A");
        assert_eq!(campos.texto(2), "");
    }

    #[test]
    fn linha_sem_delimitadores() {
        let campos = tokenize("9999").unwrap();
        assert_eq!(campos.registro(), "9999");
        assert_eq!(campos.len(), 1);
    }

    #[test]
    fn linha_curta_devolve_padroes() {
        let campos = tokenize("|C100|0|").unwrap();
        assert_eq!(campos.texto(8), "");
        assert_eq!(campos.decimal(11), Decimal::ZERO);
        assert_eq!(campos.data(9), None);
        assert_eq!(campos.campos_invalidos(), 0);
    }

    #[test]
    fn conta_campos_invalidos() {
        let campos = tokenize("|C170|1|X|desc|abc|UN|10,00|31132024|").unwrap();
        assert_eq!(campos.decimal(4), Decimal::ZERO);
        assert_eq!(campos.decimal(6), dec!(10.00));
        assert_eq!(campos.data(7), None);
        assert_eq!(campos.campos_invalidos(), 2);
    }

    #[test]
    fn pipe_isolado() {
        let campos = tokenize("|").unwrap();
        assert_eq!(campos.registro(), "");
    }
}
